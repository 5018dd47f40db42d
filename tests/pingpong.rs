// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Message-level scenarios over the software fabric: ping-pong, argument
//! validation, and failure visibility.

mod common;

//==============================================================================
// Imports
//==============================================================================

use crate::common::{
    open_pair,
    test_config,
    Pair,
};
use ::anyhow::Result;
use ::catfabric::{
    runtime::{
        fail::Fail,
        scheduler::{
            run,
            Scheduler,
        },
    },
    test_helpers::{
        TestDeviceDriver,
        TestFabric,
    },
    Config,
};
use ::libc::{
    EINVAL,
    EIO,
};

//==============================================================================
// Constants
//==============================================================================

/// Device regions stay small here; these scenarios only exercise messaging.
const DEVICE_REGION_SIZE: usize = 4096;

//==============================================================================
// Unit Tests
//==============================================================================

/// Two peers exchange rank-stamped messages and both observe the peer's
/// message verbatim.
#[test]
fn test_pingpong() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(DEVICE_REGION_SIZE);
    run(async move {
        let Pair {
            net0: _net0,
            net1: _net1,
            conn0,
            conn1,
        } = open_pair(&fabric, &driver, &config)?;

        let scheduler: Scheduler = Scheduler::get();
        let peer = scheduler.spawn("peer1", {
            let conn1 = conn1.clone();
            async move {
                let (buf, len) = conn1.recv().await?;
                let got: Vec<u8> = unsafe { ::std::slice::from_raw_parts(buf, len) }.to_vec();
                let sent: usize = conn1.send(b"[rank:1] [1]->[0]").await?;
                assert_eq!(sent, 17);
                Ok(got)
            }
        });

        let sent: usize = conn0.send(b"[rank:0] [0]->[1]").await?;
        assert_eq!(sent, 17);
        let (buf, len) = conn0.recv().await?;
        let got: &[u8] = unsafe { ::std::slice::from_raw_parts(buf, len) };
        assert_eq!(got, b"[rank:1] [1]->[0]");

        let peer_got: Vec<u8> = peer.await?;
        assert_eq!(peer_got.as_slice(), b"[rank:0] [0]->[1]");
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// A zero-length send is rejected with EINVAL before submission, and the
/// connection remains usable afterwards.
#[test]
fn test_zero_length_send_rejected() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(DEVICE_REGION_SIZE);
    run(async move {
        let Pair {
            net0: _net0,
            net1: _net1,
            conn0,
            conn1,
        } = open_pair(&fabric, &driver, &config)?;

        match conn0.send(&[]).await {
            Err(fail) => assert_eq!(fail.errno, EINVAL),
            Ok(_) => return Err(Fail::invalid_argument("zero-length send should fail")),
        }
        // Nothing was submitted: a real round still works.
        let scheduler: Scheduler = Scheduler::get();
        let peer = scheduler.spawn("peer1", {
            let conn1 = conn1.clone();
            async move {
                let (_, len) = conn1.recv().await?;
                Ok(len)
            }
        });
        conn0.send(b"ping").await?;
        assert_eq!(peer.await?, 4);
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// An oversize send and a zero-length receive are rejected with EINVAL.
#[test]
fn test_invalid_arguments_rejected() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(DEVICE_REGION_SIZE);
    run(async move {
        let Pair {
            net0: _net0,
            net1: _net1,
            conn0,
            conn1: _conn1,
        } = open_pair(&fabric, &driver, &config)?;

        let oversize: Vec<u8> = vec![0xff; config.host_buffer_size + 1];
        match conn0.send(&oversize).await {
            Err(fail) => assert_eq!(fail.errno, EINVAL),
            Ok(_) => return Err(Fail::invalid_argument("oversize send should fail")),
        }
        match conn0.recv_sized(0).await {
            Err(fail) => assert_eq!(fail.errno, EINVAL),
            Ok(_) => return Err(Fail::invalid_argument("zero-length recv should fail")),
        }
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// A failing submission surfaces as a failure from the awaiter.
#[test]
fn test_submission_error_surfaces_to_awaiter() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(DEVICE_REGION_SIZE);
    run({
        let fabric = fabric.clone();
        async move {
            let Pair {
                net0: _net0,
                net1: _net1,
                conn0,
                conn1: _conn1,
            } = open_pair(&fabric, &driver, &config)?;

            fabric.inject_submission_error(EIO);
            match conn0.send(b"doomed").await {
                Err(fail) => assert_eq!(fail.errno, EIO),
                Ok(_) => return Err(Fail::invalid_argument("injected submission error should surface")),
            }
            Ok(())
        }
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// A failure nobody awaits is surfaced when the loop exits.
#[test]
fn test_unobserved_failure_surfaces_at_run_exit() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(DEVICE_REGION_SIZE);
    let outcome = run({
        let fabric = fabric.clone();
        async move {
            let Pair {
                net0: _net0,
                net1: _net1,
                conn0,
                conn1: _conn1,
            } = open_pair(&fabric, &driver, &config)?;

            let scheduler: Scheduler = Scheduler::get();
            fabric.inject_submission_error(EIO);
            scheduler.spawn_background("doomed", async move {
                conn0.send(b"doomed").await?;
                Ok(())
            });
            Ok(())
        }
    });
    match outcome {
        Err(fail) => assert_eq!(fail.errno, EIO),
        Ok(()) => anyhow::bail!("unobserved failure should surface from run"),
    }
    Ok(())
}
