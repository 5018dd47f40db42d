// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::catfabric::{
    fabric::provider::DeviceDriver,
    network::SharedNetwork,
    test_helpers::{
        TestDeviceDriver,
        TestFabric,
    },
    Config,
    SharedConnection,
};
use ::catfabric::runtime::fail::Fail;
use ::std::rc::Rc;

//==============================================================================
// Structures
//==============================================================================

/// Two connected peers on one software fabric.
pub struct Pair {
    pub net0: SharedNetwork,
    pub net1: SharedNetwork,
    pub conn0: SharedConnection,
    pub conn1: SharedConnection,
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// A configuration with device regions small enough for tests.
pub fn test_config(device_region_size: usize) -> Config {
    Config {
        device_region_size,
        ..Config::default()
    }
}

/// Opens two networks on `fabric` and connects them to each other. Must run
/// on the loop thread; the networks must drop before the loop can go
/// quiescent.
pub fn open_pair(fabric: &TestFabric, driver: &TestDeviceDriver, config: &Config) -> Result<Pair, Fail> {
    let provider = fabric.as_fabric();
    let dyn_driver: Rc<dyn DeviceDriver> = Rc::new(driver.clone());
    let mut net0: SharedNetwork = SharedNetwork::open(&provider, dyn_driver.clone(), config.clone())?;
    let mut net1: SharedNetwork = SharedNetwork::open(&provider, dyn_driver, config.clone())?;
    let addr0 = *net0.local_addr();
    let addr1 = *net1.local_addr();
    let conn0: SharedConnection = net0.connect(&addr1)?;
    let conn1: SharedConnection = net1.connect(&addr0)?;
    Ok(Pair {
        net0,
        net1,
        conn0,
        conn1,
    })
}
