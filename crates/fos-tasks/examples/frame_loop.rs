//! Example: frame loop on top of fOS Tasks
//!
//! Each frame fans physics work out to the workers, records draw commands on
//! the render thread once physics is done, and presents on the main thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fos_tasks::{SchedulerConfig, TaskSystem, ThreadType};

const FRAMES: usize = 5;
const ISLANDS: u64 = 8;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let system = TaskSystem::new(SchedulerConfig::default())?;
    let scheduler = system.scheduler();

    println!(
        "fOS Tasks v{} running with {} worker threads",
        fos_tasks::VERSION,
        scheduler.num_worker_threads()
    );

    for frame in 0..FRAMES {
        let energy = Arc::new(AtomicU64::new(0));

        let islands: Vec<_> = (0..ISLANDS)
            .map(|island| {
                let energy = Arc::clone(&energy);
                scheduler.create_task(&format!("physics-{island}"), ThreadType::Worker, move || {
                    let sum: u64 = (0..10_000).map(|i| (i * island) % 7).sum();
                    energy.fetch_add(sum, Ordering::Relaxed);
                })
            })
            .collect();

        let record = {
            let energy = Arc::clone(&energy);
            scheduler.create_task("record", ThreadType::Render, move || {
                tracing::debug!("Recording frame, energy {}", energy.load(Ordering::Relaxed));
            })
        };
        record.join_all(&islands);

        let present = scheduler.create_task("present", ThreadType::Main, move || {
            println!("Frame {frame} presented");
        });
        present.join(&record);

        scheduler.submit(&present);
        scheduler.submit(&record);
        for island in &islands {
            scheduler.submit(island);
        }

        // The main thread drives its own queue
        while !present.is_finished() {
            if scheduler.process_jobs_on_main_thread() == 0 {
                std::thread::yield_now();
            }
        }
    }

    let checksum = scheduler.create_task_with_result("checksum", ThreadType::Specialized, || {
        (1..=100u64).sum::<u64>()
    });
    let report = checksum.then("report", ThreadType::Main, |sum| format!("checksum {sum}"));
    scheduler.submit(&checksum);
    scheduler.wait_idle(ThreadType::Main);

    if let Some(line) = report.try_result() {
        println!("{line}");
    }

    scheduler.wait_idle(ThreadType::Worker);
    scheduler.wait_idle(ThreadType::Render);
    Ok(())
}
