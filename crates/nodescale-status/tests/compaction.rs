use std::sync::Arc;
use std::thread;

use nodescale_status::{LogCollector, LogLevel, DEFAULT_ITEM_LIFETIME};

const MINUTE: u64 = 60;

#[test]
fn size_then_time_compaction() {
    let collector = LogCollector::new(2, DEFAULT_ITEM_LIFETIME);
    collector.log_at("E1", LogLevel::Info, 0);
    collector.log_at("E2", LogLevel::Info, 0);
    collector.log_at("E3", LogLevel::Info, 10 * MINUTE);

    let logs = collector.get_logs_at(20 * MINUTE);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "E3");
    assert_eq!(logs[0].timestamp, 10 * MINUTE);
}

#[test]
fn concurrent_writers_respect_the_bound() {
    let collector = Arc::new(LogCollector::new(10, DEFAULT_ITEM_LIFETIME));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                for i in 0..50 {
                    collector.log_at(format!("t{t}-{i}"), LogLevel::Debug, 1_000);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let logs = collector.get_logs_at(1_000);
    assert_eq!(logs.len(), 10);
    assert!(logs.iter().all(|item| item.timestamp >= 1_000 - DEFAULT_ITEM_LIFETIME.as_secs()));
}
