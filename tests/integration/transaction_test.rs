// Transaction Integration Tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use basaltdb::{Database, DatabaseError, LockMode, PageId};

#[path = "../common/mod.rs"]
mod common;
use common::{create_test_db, read_bytes, read_counter, setup_pages};

fn increment(db: &Database, page_id: PageId) -> Result<(), DatabaseError> {
    let txn = db.begin()?;
    let result = (|| -> Result<(), DatabaseError> {
        let current = {
            let guard = db.fetch_page(&txn, page_id, LockMode::Exclusive)?;
            let page = guard.read();
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&page.data[0..8]);
            u64::from_le_bytes(raw)
        };
        db.write_page_bytes(&txn, page_id, 0, &(current + 1).to_le_bytes())?;
        Ok(())
    })();

    match result {
        Ok(()) => db.commit(&txn).map(|_| ()),
        Err(e) => {
            db.abort(&txn)?;
            Err(e)
        }
    }
}

#[test]
fn test_abort_restores_every_touched_page() -> Result<()> {
    // Fewer frames than touched pages, so some are evicted mid-transaction
    let (db, _dir) = create_test_db(2)?;
    let pages = setup_pages(&db, 1, 3, 0x7E)?;
    let before: Vec<Vec<u8>> = pages
        .iter()
        .map(|&p| read_bytes(&db, p, 0, 64))
        .collect::<Result<_>>()?;

    let txn = db.begin()?;
    for (i, &page_id) in pages.iter().enumerate() {
        db.write_page_bytes(&txn, page_id, i, &[0xFF; 40])?;
    }
    // Second round on the first page after it was pushed out
    db.write_page_bytes(&txn, pages[0], 50, b"again")?;
    db.abort(&txn)?;

    for (i, &page_id) in pages.iter().enumerate() {
        assert_eq!(read_bytes(&db, page_id, 0, 64)?, before[i], "page {}", page_id);
    }
    Ok(())
}

#[test]
fn test_read_your_own_writes() -> Result<()> {
    let (db, _dir) = create_test_db(4)?;
    let txn = db.begin()?;

    let rid = db.insert_record(&txn, 5, b"mine")?;
    assert_eq!(db.get_record(&txn, rid)?, b"mine".to_vec());

    db.write_page_bytes(&txn, rid.page_id, 1000, b"raw")?;
    let guard = db.fetch_page(&txn, rid.page_id, LockMode::Shared)?;
    assert_eq!(&guard.read().data[1000..1003], b"raw");
    drop(guard);

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aborted_insert_leaves_no_record() -> Result<()> {
    let (db, _dir) = create_test_db(4)?;

    let keep = db.begin()?;
    let kept = db.insert_record(&keep, 1, b"kept")?;
    db.commit(&keep)?;

    let txn = db.begin()?;
    db.insert_record(&txn, 1, b"dropped")?;
    db.delete_record(&txn, kept)?;
    db.abort(&txn)?;

    let reader = db.begin()?;
    let rows = db.scan_table(&reader, 1)?;
    assert_eq!(rows, vec![(kept, b"kept".to_vec())]);
    db.commit(&reader)?;
    Ok(())
}

#[test]
fn test_exclusive_lock_blocks_readers_until_commit() -> Result<()> {
    let (db, _dir) = create_test_db(4)?;
    let db = Arc::new(db);
    let pages = setup_pages(&db, 1, 1, 0)?;
    let page_id = pages[0];

    let writer = db.begin()?;
    db.write_page_bytes(&writer, page_id, 0, b"new")?;

    let read_done = Arc::new(AtomicBool::new(false));
    let reader = {
        let db = Arc::clone(&db);
        let read_done = Arc::clone(&read_done);
        thread::spawn(move || -> Result<Vec<u8>> {
            let bytes = read_bytes(&db, page_id, 0, 3)?;
            read_done.store(true, Ordering::SeqCst);
            Ok(bytes)
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!read_done.load(Ordering::SeqCst));
    assert_eq!(db.buffer_pool().lock_manager().waiting_count(page_id), 1);

    db.commit(&writer)?;
    let seen = reader.join().expect("reader thread panicked")?;
    assert_eq!(seen, b"new".to_vec());
    Ok(())
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let (db, _dir) = create_test_db(4)?;
    let pages = setup_pages(&db, 1, 1, 3)?;
    let lock_manager = db.buffer_pool().lock_manager().clone();

    let t1 = db.begin()?;
    let t2 = db.begin()?;
    let g1 = db.fetch_page(&t1, pages[0], LockMode::Shared)?;
    let g2 = db.fetch_page(&t2, pages[0], LockMode::Shared)?;
    assert_eq!(g1.read().data[0], g2.read().data[0]);
    assert_eq!(lock_manager.lock_mode(t1.id(), pages[0]), Some(LockMode::Shared));
    assert_eq!(lock_manager.lock_mode(t2.id(), pages[0]), Some(LockMode::Shared));
    drop((g1, g2));

    db.commit(&t1)?;
    db.commit(&t2)?;
    assert!(lock_manager.locked_pages(t1.id()).is_empty());
    Ok(())
}

#[test]
fn test_concurrent_increments_are_serialized() -> Result<()> {
    const THREADS: usize = 4;
    const INCREMENTS: usize = 25;

    let (db, _dir) = create_test_db(8)?;
    let db = Arc::new(db);
    let page_id = db.allocate_page(1)?;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<()> {
                barrier.wait();
                for _ in 0..INCREMENTS {
                    // A single exclusive page lock cannot deadlock
                    increment(&db, page_id)?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked")?;
    }
    assert_eq!(read_counter(&db, page_id)?, (THREADS * INCREMENTS) as u64);
    Ok(())
}

#[test]
fn test_concurrent_inserts_into_separate_tables() -> Result<()> {
    const THREADS: u32 = 4;
    const ROWS: usize = 50;

    let (db, _dir) = create_test_db(8)?;
    let db = Arc::new(db);

    let handles: Vec<_> = (0..THREADS)
        .map(|table_id| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> Result<()> {
                let txn = db.begin()?;
                for row in 0..ROWS {
                    let record = format!("table {} row {}", table_id, row);
                    db.insert_record(&txn, table_id, record.as_bytes())?;
                }
                db.commit(&txn)?;
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    let reader = db.begin()?;
    for table_id in 0..THREADS {
        let rows = db.scan_table(&reader, table_id)?;
        assert_eq!(rows.len(), ROWS);
        assert_eq!(rows[0].1, format!("table {} row 0", table_id).into_bytes());
    }
    db.commit(&reader)?;
    Ok(())
}
