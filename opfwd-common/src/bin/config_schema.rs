// ABOUTME: emits a json schema for the opfwd configuration file to stdout.
// ABOUTME: intended for editor validation of config.yaml.

fn main() -> Result<(), serde_json::Error> {
    let schema = schemars::schema_for!(opfwd_common::Config);
    let json = serde_json::to_string_pretty(&schema)?;
    println!("{json}");
    Ok(())
}
