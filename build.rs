use anyhow::Result;
use canboot_config::{codegen::generate_modules, Configuration};
use std::{env, path::PathBuf};

fn main() -> Result<()> {
    process_configuration()?;
    Ok(())
}

/// Reads the RON configuration from `CANBOOT_CONFIG`. An unset or empty
/// variable selects the default configuration, which is what the host
/// test suite runs against.
fn process_configuration() -> Result<()> {
    println!("cargo:rerun-if-env-changed=CANBOOT_CONFIG");

    let configuration: Configuration = match env::var("CANBOOT_CONFIG") {
        Ok(contents) if !contents.trim().is_empty() => ron::from_str(&contents)?,
        _ => Configuration::default(),
    };
    configuration.validate()?;

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    generate_modules(&out_dir, &configuration)?;
    Ok(())
}
