// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    limits::{
        BUFFER_SIZE,
        DEFAULT_ALIGN,
        MEMORY_REGION_SIZE,
    },
};
use ::libc::EINVAL;
use ::std::{
    fs::File,
    io::Read,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//==============================================================================
// Structures
//==============================================================================

/// Runtime configuration: capacities of the buffers a connection owns and
/// their alignment boundary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the send/recv host message buffers.
    pub host_buffer_size: usize,
    /// Capacity of the read/write device regions.
    pub device_region_size: usize,
    /// Alignment boundary for registered buffers.
    pub align: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Config {
    /// Reads a configuration file. Absent keys keep their defaults.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        let config: Vec<Yaml> = match YamlLoader::load_from_str(&config_s) {
            Ok(config) => config,
            Err(_) => return Err(Fail::new(EINVAL, "malformed YAML config")),
        };
        let config_obj: &Yaml = match &config[..] {
            [config_obj] => config_obj,
            _ => return Err(Fail::new(EINVAL, "wrong number of config objects")),
        };
        let mut parsed: Self = Self::default();
        if let Some(size) = config_obj["catfabric"]["host_buffer_size"].as_i64() {
            parsed.host_buffer_size = size as usize;
        }
        if let Some(size) = config_obj["catfabric"]["device_region_size"].as_i64() {
            parsed.device_region_size = size as usize;
        }
        if let Some(align) = config_obj["catfabric"]["align"].as_i64() {
            parsed.align = align as usize;
        }
        if parsed.host_buffer_size == 0 || parsed.device_region_size == 0 || !parsed.align.is_power_of_two() {
            return Err(Fail::new(EINVAL, "invalid buffer configuration"));
        }
        Ok(parsed)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for Config {
    fn default() -> Self {
        Self {
            host_buffer_size: BUFFER_SIZE,
            device_region_size: MEMORY_REGION_SIZE,
            align: DEFAULT_ALIGN,
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::runtime::limits::{
        BUFFER_SIZE,
        DEFAULT_ALIGN,
        MEMORY_REGION_SIZE,
    };

    #[test]
    fn default_config_carries_limits() {
        let config: Config = Config::default();
        assert_eq!(config.host_buffer_size, BUFFER_SIZE);
        assert_eq!(config.device_region_size, MEMORY_REGION_SIZE);
        assert_eq!(config.align, DEFAULT_ALIGN);
    }
}
