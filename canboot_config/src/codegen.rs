//! Generation of the constants the bootloader library includes.
use std::{fs::OpenOptions, io::Write, path::Path};

use anyhow::Result;
use proc_macro2::TokenStream;
use quote::quote;

use crate::Configuration;

/// Name of the generated file, relative to the output directory.
pub const CONFIGURATION_FILENAME: &str = "configuration.rs";

/// Writes `configuration.rs` into `out_dir`. The library pulls it in
/// through `include!`, so it only contains item definitions.
pub fn generate_modules<P: AsRef<Path>>(out_dir: P, configuration: &Configuration) -> Result<()> {
    let path = out_dir.as_ref().join(CONFIGURATION_FILENAME);
    let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    file.write_all(generate_tokens(configuration).to_string().as_bytes())?;
    Ok(())
}

pub fn generate_tokens(configuration: &Configuration) -> TokenStream {
    let mut code = generate_identity(configuration);
    code.extend(generate_memory_map(configuration));
    code.extend(generate_timing(configuration));
    code
}

fn generate_identity(configuration: &Configuration) -> TokenStream {
    let module_type = &configuration.identity.module_type;
    let default_module_name = &configuration.identity.default_module_name;
    quote! {
        /// Firmware family reported to the master.
        pub const MODULE_TYPE: &str = #module_type;
        /// Name given to a module whose configuration holds none.
        pub const DEFAULT_MODULE_NAME: &str = #default_module_name;
    }
}

fn generate_memory_map(configuration: &Configuration) -> TokenStream {
    let memory = &configuration.memory_configuration;
    let start = memory.program_flash_start;
    let end = memory.program_flash_end;
    let user_data_size = memory.user_data_size;
    quote! {
        pub const PROGRAM_FLASH_START: u32 = #start;
        pub const PROGRAM_FLASH_END: u32 = #end;
        pub const USER_DATA_SIZE: u32 = #user_data_size;
    }
}

fn generate_timing(configuration: &Configuration) -> TokenStream {
    let timing = &configuration.timing_configuration;
    let master_wait = timing.master_wait_ms;
    let protocol_tick = timing.protocol_tick_ms;
    let announce_interval = timing.announce_interval;
    let halt_sleep = timing.halt_sleep_ms;
    quote! {
        pub const MASTER_WAIT_MS: u32 = #master_wait;
        pub const PROTOCOL_TICK_MS: u32 = #protocol_tick;
        pub const ANNOUNCE_INTERVAL: u8 = #announce_interval;
        pub const HALT_SLEEP_MS: u32 = #halt_sleep;
    }
}
