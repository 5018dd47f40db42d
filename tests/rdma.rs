// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! One-sided scenarios over the software fabric: the region handshake,
//! single-page and streaming writes, and immediate-data routing.

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
    network::wire::{
        parse_handshake,
        serialize_handshake,
        CudaRegion,
        Message,
    },
    runtime::{
        fail::Fail,
        scheduler::{
            run,
            sleep,
            Scheduler,
        },
    },
    test_helpers::{
        rand_buffer,
        TestDeviceDriver,
        TestFabric,
    },
    Config,
};
use ::libc::{
    EEXIST,
    EINVAL,
};
use ::std::time::Duration;

//==============================================================================
// Constants
//==============================================================================

/// One 64 KiB page.
const PAGE_SIZE: usize = 65536;

/// Seed used by the handshake scenarios.
const SEED: u64 = 0x1_2345_6789;

//==============================================================================
// Unit Tests
//==============================================================================

/// The reader advertises its device region; the writer receives exactly those
/// fields.
#[test]
fn test_handshake() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(PAGE_SIZE);
    run(async move {
        let Pair {
            net0: _net0,
            net1: _net1,
            conn0,
            conn1,
        } = open_pair(&fabric, &driver, &config)?;

        // conn1 belongs to the reader (rank 1); it advertises its read
        // region.
        let advertised: CudaRegion = CudaRegion {
            addr: conn1.read_buffer().data(),
            size: conn1.read_buffer().len() as u64,
            key: conn1.read_buffer().key(),
        };
        let scheduler: Scheduler = Scheduler::get();
        let reader = scheduler.spawn("reader", {
            let conn1 = conn1.clone();
            async move {
                let message: Message = Message {
                    rank: 1,
                    num: 1,
                    seed: SEED,
                };
                let mut buf: Vec<u8> = vec![0; message.wire_size()];
                let len: usize = serialize_handshake(&message, &[advertised], &mut buf)?;
                conn1.send(&buf[..len]).await?;
                Ok(())
            }
        });

        let (buf, len) = conn0.recv().await?;
        let bytes: &[u8] = unsafe { ::std::slice::from_raw_parts(buf, len) };
        let (message, regions) = parse_handshake(bytes, len)?;
        assert_eq!(message.rank, 1);
        assert_eq!(message.num, 1);
        assert_eq!(message.seed, SEED);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0], advertised);

        reader.await?;
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// A single 64 KiB write with immediate data lands byte-for-byte in the
/// reader's device region and resumes the matching read.
#[test]
fn test_single_page_write() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(PAGE_SIZE);
    run({
        let driver = driver.clone();
        async move {
            let Pair {
                net0: _net0,
                net1: _net1,
                conn0,
                conn1,
            } = open_pair(&fabric, &driver, &config)?;

            let remote_addr: u64 = conn1.read_buffer().data();
            let remote_key: u64 = conn1.read_buffer().key();
            let scheduler: Scheduler = Scheduler::get();
            let reader = scheduler.spawn("reader", {
                let conn1 = conn1.clone();
                async move {
                    let addr: u64 = conn1.read(0x123).await?;
                    Ok(addr)
                }
            });
            // Yield so the reader registers its tag before the write lands.
            sleep(Duration::from_millis(1)).await;

            let payload: Vec<u8> = rand_buffer(SEED, PAGE_SIZE);
            driver.write_bytes(conn0.write_buffer().data(), &payload)?;
            let written: usize = conn0.write(PAGE_SIZE, remote_addr, remote_key, 0x123).await?;
            assert_eq!(written, PAGE_SIZE);

            let landed_at: u64 = reader.await?;
            assert_eq!(landed_at, remote_addr);
            let landed: Vec<u8> = driver.read_bytes(remote_addr, PAGE_SIZE)?;
            assert_eq!(landed, payload);
            Ok(())
        }
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// A stream of 1000 pages, only the last carrying immediate data, resumes the
/// reader's single read exactly once with the full region intact.
#[test]
fn test_multi_page_streaming() -> Result<()> {
    const NUM_PAGES: usize = 1000;
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(NUM_PAGES * PAGE_SIZE);
    run({
        let driver = driver.clone();
        async move {
            let Pair {
                net0: _net0,
                net1: _net1,
                conn0,
                conn1,
            } = open_pair(&fabric, &driver, &config)?;

            let remote_addr: u64 = conn1.read_buffer().data();
            let remote_key: u64 = conn1.read_buffer().key();
            let scheduler: Scheduler = Scheduler::get();
            let reader = scheduler.spawn("reader", {
                let conn1 = conn1.clone();
                async move { conn1.read(0x123).await }
            });
            // Yield so the reader registers its tag before the stream starts.
            sleep(Duration::from_millis(1)).await;

            let expected: Vec<u8> = rand_buffer(SEED, NUM_PAGES * PAGE_SIZE);
            for page in 0..NUM_PAGES {
                let chunk: &[u8] = &expected[page * PAGE_SIZE..(page + 1) * PAGE_SIZE];
                driver.write_bytes(conn0.write_buffer().data(), chunk)?;
                let imm: u32 = if page == NUM_PAGES - 1 { 0x123 } else { 0 };
                let written: usize =
                    conn0.write(PAGE_SIZE, remote_addr + (page * PAGE_SIZE) as u64, remote_key, imm).await?;
                assert_eq!(written, PAGE_SIZE);
            }

            reader.await?;
            let landed: Vec<u8> = driver.read_bytes(remote_addr, NUM_PAGES * PAGE_SIZE)?;
            assert_eq!(landed, expected);
            Ok(())
        }
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// A read resumes only for its own tag: a write carrying a different tag
/// leaves it parked.
#[test]
fn test_immediate_data_routing() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(PAGE_SIZE);
    run({
        let driver = driver.clone();
        async move {
            let Pair {
                net0: _net0,
                net1: _net1,
                conn0,
                conn1,
            } = open_pair(&fabric, &driver, &config)?;

            let remote_addr: u64 = conn1.read_buffer().data();
            let remote_key: u64 = conn1.read_buffer().key();
            let scheduler: Scheduler = Scheduler::get();
            let matching = scheduler.spawn("matching", {
                let conn1 = conn1.clone();
                async move { conn1.read(0x123).await }
            });
            let mismatched = scheduler.spawn("mismatched", {
                let conn1 = conn1.clone();
                async move { conn1.read(0x777).await }
            });
            // Yield so both readers register their tags before the write.
            sleep(Duration::from_millis(1)).await;

            driver.write_bytes(conn0.write_buffer().data(), &rand_buffer(SEED, PAGE_SIZE))?;
            conn0.write(PAGE_SIZE, remote_addr, remote_key, 0x123).await?;

            matching.await?;
            assert!(!mismatched.has_completed());
            // Dropping the parked read unregisters its tag; the loop drains.
            drop(mismatched);
            Ok(())
        }
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// Immediate-data tags are unique across in-flight reads: a duplicate
/// registration fails with EEXIST, and tag zero is rejected outright.
#[test]
fn test_immediate_data_tag_validation() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(PAGE_SIZE);
    run({
        let driver = driver.clone();
        async move {
            let Pair {
                net0: _net0,
                net1: _net1,
                conn0,
                conn1,
            } = open_pair(&fabric, &driver, &config)?;

            match conn1.read(0).await {
                Err(fail) => assert_eq!(fail.errno, EINVAL),
                Ok(_) => return Err(Fail::invalid_argument("tag zero should be rejected")),
            }

            let remote_addr: u64 = conn1.read_buffer().data();
            let remote_key: u64 = conn1.read_buffer().key();
            let scheduler: Scheduler = Scheduler::get();
            let first = scheduler.spawn("first", {
                let conn1 = conn1.clone();
                async move { conn1.read(0x55).await }
            });
            let second = scheduler.spawn("second", {
                let conn1 = conn1.clone();
                async move { conn1.read(0x55).await }
            });
            // Yield so the first read registers before the write lands.
            sleep(Duration::from_millis(1)).await;

            driver.write_bytes(conn0.write_buffer().data(), &rand_buffer(SEED, PAGE_SIZE))?;
            conn0.write(PAGE_SIZE, remote_addr, remote_key, 0x55).await?;

            first.await?;
            match second.await {
                Err(fail) => assert_eq!(fail.errno, EEXIST),
                Ok(_) => return Err(Fail::invalid_argument("duplicate tag should be rejected")),
            }
            Ok(())
        }
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}

/// An oversize write is rejected with EINVAL before submission.
#[test]
fn test_oversize_write_rejected() -> Result<()> {
    let fabric: TestFabric = TestFabric::new();
    let driver: TestDeviceDriver = TestDeviceDriver::new(0);
    let config: Config = test_config(PAGE_SIZE);
    run(async move {
        let Pair {
            net0: _net0,
            net1: _net1,
            conn0,
            conn1,
        } = open_pair(&fabric, &driver, &config)?;

        let remote_addr: u64 = conn1.read_buffer().data();
        let remote_key: u64 = conn1.read_buffer().key();
        match conn0.write(PAGE_SIZE + 1, remote_addr, remote_key, 0).await {
            Err(fail) => assert_eq!(fail.errno, EINVAL),
            Ok(_) => return Err(Fail::invalid_argument("oversize write should fail")),
        }
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))
}
