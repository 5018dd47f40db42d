// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Scheduler-level scenarios: sleeping, timer ordering, run-to-completion,
//! and quiescent termination.

//==============================================================================
// Imports
//==============================================================================

use ::catfabric::runtime::scheduler::{
    run,
    sleep,
    Scheduler,
};
use ::anyhow::Result;
use ::std::{
    cell::RefCell,
    rc::Rc,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Unit Tests
//==============================================================================

/// Sleeping for 50 ms returns after at least 50 ms and well under 200 ms.
#[test]
fn test_sleep_bounds() -> Result<()> {
    let start: Instant = Instant::now();
    run(async {
        sleep(Duration::from_millis(50)).await;
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
    let elapsed: Duration = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "woke too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(200), "woke too late: {:?}", elapsed);
    Ok(())
}

/// Earlier deadlines resume before later ones, and equal deadlines resume in
/// submission order.
#[test]
fn test_timer_ordering() -> Result<()> {
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let result: Vec<&'static str> = run({
        let order = order.clone();
        async move {
            let scheduler: Scheduler = Scheduler::get();
            let late = scheduler.spawn("late", {
                let order = order.clone();
                async move {
                    sleep(Duration::from_millis(60)).await;
                    order.borrow_mut().push("late");
                    Ok(())
                }
            });
            let early = scheduler.spawn("early", {
                let order = order.clone();
                async move {
                    sleep(Duration::from_millis(20)).await;
                    order.borrow_mut().push("early");
                    Ok(())
                }
            });
            // Two tasks with the same deadline resume in submission order.
            let tie_a = scheduler.spawn("tie_a", {
                let order = order.clone();
                async move {
                    sleep(Duration::from_millis(40)).await;
                    order.borrow_mut().push("tie_a");
                    Ok(())
                }
            });
            let tie_b = scheduler.spawn("tie_b", {
                let order = order.clone();
                async move {
                    sleep(Duration::from_millis(40)).await;
                    order.borrow_mut().push("tie_b");
                    Ok(())
                }
            });
            late.await?;
            early.await?;
            tie_a.await?;
            tie_b.await?;
            Ok(order.borrow().clone())
        }
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
    assert_eq!(result, vec!["early", "tie_a", "tie_b", "late"]);
    Ok(())
}

/// Between suspension points a task runs without interleaving: markers penned
/// by one task's straight-line section are never split by another task's.
#[test]
fn test_run_to_completion() -> Result<()> {
    let log: Rc<RefCell<Vec<(u32, u32)>>> = Rc::new(RefCell::new(Vec::new()));
    let trace: Vec<(u32, u32)> = run({
        let log = log.clone();
        async move {
            let scheduler: Scheduler = Scheduler::get();
            let mut tasks = Vec::new();
            for id in 0..3u32 {
                let log = log.clone();
                tasks.push(scheduler.spawn("worker", async move {
                    for _ in 0..4 {
                        log.borrow_mut().push((id, 0));
                        log.borrow_mut().push((id, 1));
                        sleep(Duration::from_millis(1)).await;
                    }
                    Ok(())
                }));
            }
            for task in tasks {
                task.await?;
            }
            Ok(log.borrow().clone())
        }
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
    // Every (id, 0) marker is immediately followed by (id, 1).
    let mut i: usize = 0;
    while i < trace.len() {
        assert_eq!(trace[i].1, 0);
        assert_eq!(trace[i + 1], (trace[i].0, 1));
        i += 2;
    }
    Ok(())
}

/// The loop stays alive until pending timers fire, even after the main task
/// has completed.
#[test]
fn test_quiescent_termination_waits_for_timers() -> Result<()> {
    let start: Instant = Instant::now();
    run(async {
        let scheduler: Scheduler = Scheduler::get();
        scheduler.spawn_background("straggler", async {
            sleep(Duration::from_millis(120)).await;
            Ok(())
        });
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
    assert!(start.elapsed() >= Duration::from_millis(120));
    Ok(())
}

/// stop() forces the loop to exit even though a timer is still pending.
#[test]
fn test_stop_preempts_pending_timers() -> Result<()> {
    let start: Instant = Instant::now();
    run(async {
        let scheduler: Scheduler = Scheduler::get();
        scheduler.spawn_background("endless", async {
            sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        Scheduler::get().stop();
        Ok(())
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
    assert!(start.elapsed() < Duration::from_secs(5));
    Ok(())
}

/// A task's result can be awaited by another task and carries its value.
#[test]
fn test_await_task_result() -> Result<()> {
    let value: u32 = run(async {
        let scheduler: Scheduler = Scheduler::get();
        let task = scheduler.spawn("producer", async {
            sleep(Duration::from_millis(10)).await;
            Ok(41u32)
        });
        let got: u32 = task.await?;
        Ok(got + 1)
    })
    .map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
    assert_eq!(value, 42);
    Ok(())
}
