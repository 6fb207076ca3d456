// Recovery Integration Tests

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use basaltdb::common::types::PageId;
use basaltdb::transaction::wal::LogRecordType;

#[path = "../common/mod.rs"]
mod common;
use common::{crash, create_test_db, read_bytes, reopen, setup_pages};

#[test]
fn test_committed_update_redone_and_loser_undone() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let p1 = db.allocate_page(1)?;
    let p2 = db.allocate_page(1)?;

    let t1 = db.begin()?;
    db.write_page_bytes(&t1, p1, 0, b"committed")?;
    db.commit(&t1)?;

    let t2 = db.begin()?;
    db.write_page_bytes(&t2, p2, 0, b"in flight")?;
    db.log_manager().flush()?;
    let loser = t2.id();

    // Nothing was written to the table files before the crash
    crash(db);

    let db = reopen(&dir, 16)?;
    assert_eq!(db.recovery_summary().losers, vec![loser]);
    assert_eq!(read_bytes(&db, p1, 0, 9)?, b"committed".to_vec());
    assert_eq!(read_bytes(&db, p2, 0, 9)?, vec![0u8; 9]);
    Ok(())
}

#[test]
fn test_stolen_uncommitted_page_is_rolled_back() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let pages = setup_pages(&db, 1, 1, 0x11)?;
    let page_id = pages[0];

    let txn = db.begin()?;
    db.write_page_bytes(&txn, page_id, 0, &[0x99; 32])?;
    // Uncommitted change reaches disk (the log goes first)
    db.buffer_pool().flush_page(page_id)?;
    crash(db);

    let db = reopen(&dir, 16)?;
    assert_eq!(db.recovery_summary().undone, 1);
    assert_eq!(read_bytes(&db, page_id, 0, 32)?, vec![0x11; 32]);
    Ok(())
}

#[test]
fn test_recovery_is_repeatable() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let pages = setup_pages(&db, 1, 3, 0x22)?;

    let txn = db.begin()?;
    db.write_page_bytes(&txn, pages[1], 4, b"lost")?;
    db.log_manager().flush()?;
    crash(db);

    let mut images = Vec::new();
    for _ in 0..3 {
        let db = reopen(&dir, 16)?;
        let mut image = Vec::new();
        for &page_id in &pages {
            image.push(read_bytes(&db, page_id, 0, 32)?);
        }
        images.push(image);
        crash(db);
    }

    assert_eq!(images[0], images[1]);
    assert_eq!(images[1], images[2]);
    assert_eq!(images[0][1], vec![0x22; 32]);
    Ok(())
}

#[test]
fn test_recovery_starts_from_checkpoint() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let pages = setup_pages(&db, 1, 2, 0x01)?;

    // Active across the checkpoint, never finished
    let long_running = db.begin()?;
    db.write_page_bytes(&long_running, pages[0], 0, &[0xAA; 8])?;
    let checkpoint_lsn = db.checkpoint()?;

    let txn = db.begin()?;
    db.write_page_bytes(&txn, pages[1], 0, &[0xBB; 8])?;
    db.commit(&txn)?;
    db.write_page_bytes(&long_running, pages[0], 8, &[0xCC; 8])?;
    db.log_manager().flush()?;
    crash(db);

    let db = reopen(&dir, 16)?;
    let summary = db.recovery_summary().clone();
    assert_eq!(summary.checkpoint_lsn, Some(checkpoint_lsn));
    assert!(summary.redo_start_lsn <= checkpoint_lsn);
    assert_eq!(summary.losers, vec![long_running.id()]);
    // Both updates of the loser are undone, the first one predates the checkpoint
    assert_eq!(summary.undone, 2);

    assert_eq!(read_bytes(&db, pages[0], 0, 16)?, vec![0x01; 16]);
    assert_eq!(read_bytes(&db, pages[1], 0, 8)?, vec![0xBB; 8]);
    Ok(())
}

#[test]
fn test_completed_abort_stays_rolled_back() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let pages = setup_pages(&db, 1, 1, 0x05)?;

    let txn = db.begin()?;
    db.write_page_bytes(&txn, pages[0], 0, &[0x50; 16])?;
    db.buffer_pool().flush_page(pages[0])?;
    db.abort(&txn)?;
    // The restored page never reaches disk before the crash
    crash(db);

    let db = reopen(&dir, 16)?;
    assert!(db.recovery_summary().losers.is_empty());
    assert_eq!(read_bytes(&db, pages[0], 0, 16)?, vec![0x05; 16]);
    Ok(())
}

#[test]
fn test_unflushed_commit_is_not_lost() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let page_id = db.allocate_page(2)?;

    let txn = db.begin()?;
    let rid = db.insert_record(&txn, 2, b"durable row")?;
    db.commit(&txn)?;
    crash(db);

    let db = reopen(&dir, 16)?;
    let reader = db.begin()?;
    assert_eq!(rid.page_id, page_id);
    assert_eq!(db.get_record(&reader, rid)?, b"durable row".to_vec());
    db.commit(&reader)?;
    Ok(())
}

#[test]
fn test_torn_log_tail_is_ignored() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let pages = setup_pages(&db, 1, 1, 0x33)?;
    let log_path = db.log_manager().log_path().to_path_buf();
    let records_before = db.log_manager().read_all()?.len();
    crash(db);

    // Half-written frame: a length prefix promising more bytes than exist
    let mut file = OpenOptions::new().append(true).open(&log_path)?;
    file.write_all(&[200, 0, 0, 0, 1, 2, 3])?;
    drop(file);

    let db = reopen(&dir, 16)?;
    assert_eq!(read_bytes(&db, pages[0], 0, 32)?, vec![0x33; 32]);

    let records = db.log_manager().read_all()?;
    assert!(records.len() >= records_before);
    assert!(records.windows(2).all(|w| w[1].lsn == w[0].lsn + 1));
    Ok(())
}

#[test]
fn test_losers_get_abort_records() -> Result<()> {
    let (db, dir) = create_test_db(16)?;
    let pages = setup_pages(&db, 1, 1, 0)?;

    let txn = db.begin()?;
    db.write_page_bytes(&txn, pages[0], 0, b"x")?;
    db.log_manager().flush()?;
    let loser = txn.id();
    crash(db);

    let db = reopen(&dir, 16)?;
    let records = db.log_manager().read_all()?;
    let loser_types: Vec<LogRecordType> = records
        .iter()
        .filter(|r| r.txn_id == loser)
        .map(|r| r.record_type)
        .collect();
    assert_eq!(
        loser_types,
        vec![
            LogRecordType::Begin,
            LogRecordType::Update,
            LogRecordType::CompensationUpdate,
            LogRecordType::Abort
        ]
    );

    // New transactions never reuse an ID from the log
    let txn = db.begin()?;
    assert!(txn.id() > loser);
    Ok(())
}

#[test]
fn test_random_workload_survives_crash() -> Result<()> {
    const PAGES: usize = 6;
    const TRANSACTIONS: usize = 40;

    let mut rng = StdRng::seed_from_u64(0xBA5A17);
    // Small pool so pages get evicted, dirty and uncommitted ones included
    let (db, dir) = create_test_db(3)?;
    let pages = setup_pages(&db, 1, PAGES, 0)?;

    // Committed value of every (page, byte offset) that was touched
    let mut expected: HashMap<(PageId, usize), u8> = HashMap::new();

    for i in 0..TRANSACTIONS {
        let txn = db.begin()?;
        let mut writes = Vec::new();
        for _ in 0..rng.gen_range(1..4) {
            let page_id = pages[rng.gen_range(0..PAGES)];
            let offset = rng.gen_range(0..64);
            let value = rng.gen_range(1..=255u8);
            db.write_page_bytes(&txn, page_id, offset, &[value])?;
            writes.push(((page_id, offset), value));
        }

        let outcome = if i + 1 == TRANSACTIONS { 0 } else { rng.gen_range(0..3) };
        match outcome {
            // Aborted, or still running at the crash (the last one)
            0 => {
                for (key, _) in writes {
                    expected.entry(key).or_insert(0);
                }
                if i + 1 < TRANSACTIONS {
                    db.abort(&txn)?;
                }
            }
            _ => {
                db.commit(&txn)?;
                for (key, value) in writes {
                    expected.insert(key, value);
                }
            }
        }
    }
    db.log_manager().flush()?;
    crash(db);

    let db = reopen(&dir, 3)?;
    for ((page_id, offset), value) in expected {
        assert_eq!(read_bytes(&db, page_id, offset, 1)?, vec![value], "page {} offset {}", page_id, offset);
    }
    Ok(())
}
