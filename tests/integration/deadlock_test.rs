// Deadlock Detection Integration Tests

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use basaltdb::transaction::wal::LogRecordType;
use basaltdb::{Database, DatabaseError, LockError, LockMode, PageId, Transaction};

#[path = "../common/mod.rs"]
mod common;
use common::{create_test_db, read_counter, setup_pages, test_config};

/// Outcome of one thread's transaction
#[derive(Debug, PartialEq)]
enum Outcome {
    Committed,
    Aborted,
}

// Run `body`, committing on success and rolling back on a deadlock verdict
fn run_txn<F>(db: &Database, txn: &Transaction, body: F) -> Result<Outcome>
where
    F: FnOnce() -> Result<(), DatabaseError>,
{
    match body() {
        Ok(()) => {
            db.commit(txn)?;
            Ok(Outcome::Committed)
        }
        Err(e) if e.is_transaction_aborted() => {
            db.abort(txn)?;
            Ok(Outcome::Aborted)
        }
        Err(e) => Err(e.into()),
    }
}

fn read_u64(db: &Database, txn: &Transaction, page_id: PageId) -> Result<u64, DatabaseError> {
    let guard = db.fetch_page(txn, page_id, LockMode::Exclusive)?;
    let page = guard.read();
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&page.data[0..8]);
    Ok(u64::from_le_bytes(raw))
}

#[test]
fn test_cross_deadlock_aborts_younger() -> Result<()> {
    let (db, _dir) = create_test_db(8)?;
    let db = Arc::new(db);
    let pages = setup_pages(&db, 1, 2, 0)?;

    let older = db.begin()?;
    let younger = db.begin()?;
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |txn: Arc<Transaction>, first: PageId, second: PageId| {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> Result<Outcome> {
            run_txn(&db, &txn, || {
                db.write_page_bytes(&txn, first, 0, &[txn.id() as u8; 4])?;
                barrier.wait();
                db.write_page_bytes(&txn, second, 4, &[txn.id() as u8; 4])?;
                Ok(())
            })
        })
    };

    let a = spawn(Arc::clone(&older), pages[0], pages[1]);
    let b = spawn(Arc::clone(&younger), pages[1], pages[0]);
    let a = a.join().expect("thread panicked")?;
    let b = b.join().expect("thread panicked")?;

    assert_eq!(a, Outcome::Committed);
    assert_eq!(b, Outcome::Aborted);
    assert!(!db.buffer_pool().lock_manager().is_victim(younger.id()));

    // Only the survivor's bytes remain
    let id = older.id() as u8;
    assert_eq!(common::read_bytes(&db, pages[0], 0, 8)?, vec![id, id, id, id, 0, 0, 0, 0]);
    assert_eq!(common::read_bytes(&db, pages[1], 0, 8)?, vec![0, 0, 0, 0, id, id, id, id]);
    Ok(())
}

#[test]
fn test_deadlock_victim_cannot_commit() -> Result<()> {
    let (db, _dir) = create_test_db(8)?;
    let db = Arc::new(db);
    let pages = setup_pages(&db, 1, 2, 0)?;

    let older = db.begin()?;
    let younger = db.begin()?;
    let barrier = Arc::new(Barrier::new(2));

    // Each side ignores a failed write and tries to commit anyway
    let spawn = |txn: Arc<Transaction>, first: PageId, second: PageId| {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> Result<(bool, Option<DatabaseError>)> {
            db.write_page_bytes(&txn, first, 0, &[txn.id() as u8; 4])?;
            barrier.wait();
            let write_failed = db.write_page_bytes(&txn, second, 4, &[txn.id() as u8; 4]).is_err();
            match db.commit(&txn) {
                Ok(_) => Ok((write_failed, None)),
                Err(e) => {
                    db.abort(&txn)?;
                    Ok((write_failed, Some(e)))
                }
            }
        })
    };

    let a = spawn(Arc::clone(&older), pages[0], pages[1]);
    let b = spawn(Arc::clone(&younger), pages[1], pages[0]);
    let (older_write_failed, older_refused) = a.join().expect("thread panicked")?;
    let (younger_write_failed, younger_refused) = b.join().expect("thread panicked")?;

    assert!(!older_write_failed);
    assert!(older_refused.is_none());
    assert!(younger_write_failed);
    let refused = younger_refused.expect("victim commit should be refused");
    assert!(refused.is_transaction_aborted());
    assert!(matches!(
        refused,
        DatabaseError::TransactionAborted {
            source: LockError::Deadlock(id),
            ..
        } if id == younger.id()
    ));

    // The victim never logged a commit and none of its bytes survive
    let victim_types: Vec<LogRecordType> = db
        .log_manager()
        .read_all()?
        .into_iter()
        .filter(|r| r.txn_id == younger.id())
        .map(|r| r.record_type)
        .collect();
    assert!(!victim_types.contains(&LogRecordType::Commit));
    assert_eq!(victim_types.last(), Some(&LogRecordType::Abort));

    let id = older.id() as u8;
    assert_eq!(common::read_bytes(&db, pages[0], 0, 8)?, vec![id, id, id, id, 0, 0, 0, 0]);
    assert_eq!(common::read_bytes(&db, pages[1], 0, 8)?, vec![0, 0, 0, 0, id, id, id, id]);
    Ok(())
}

#[test]
fn test_upgrade_deadlock() -> Result<()> {
    let (db, _dir) = create_test_db(8)?;
    let db = Arc::new(db);
    let pages = setup_pages(&db, 1, 1, 0)?;
    let page_id = pages[0];

    let older = db.begin()?;
    let younger = db.begin()?;
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [Arc::clone(&older), Arc::clone(&younger)]
        .into_iter()
        .map(|txn| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<Outcome> {
                run_txn(&db, &txn, || {
                    drop(db.fetch_page(&txn, page_id, LockMode::Shared)?);
                    barrier.wait();
                    // Both readers now want to write
                    db.write_page_bytes(&txn, page_id, 0, &[0xEE])?;
                    Ok(())
                })
            })
        })
        .collect();

    let outcomes: Vec<Outcome> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect::<Result<_>>()?;
    assert_eq!(outcomes, vec![Outcome::Committed, Outcome::Aborted]);
    assert_eq!(common::read_bytes(&db, page_id, 0, 1)?, vec![0xEE]);
    Ok(())
}

#[test]
fn test_three_way_cycle() -> Result<()> {
    let (db, _dir) = create_test_db(8)?;
    let db = Arc::new(db);
    let pages = setup_pages(&db, 1, 3, 0)?;

    let txns: Vec<Arc<Transaction>> = (0..3).map(|_| db.begin()).collect::<Result<_, _>>()?;
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = txns
        .iter()
        .enumerate()
        .map(|(i, txn)| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            let txn = Arc::clone(txn);
            let own = pages[i];
            let next = pages[(i + 1) % 3];
            thread::spawn(move || -> Result<Outcome> {
                run_txn(&db, &txn, || {
                    db.write_page_bytes(&txn, own, 0, &[1])?;
                    barrier.wait();
                    db.write_page_bytes(&txn, next, 1, &[2])?;
                    Ok(())
                })
            })
        })
        .collect();

    let outcomes: Vec<Outcome> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect::<Result<_>>()?;

    // Only the youngest member of the cycle is sacrificed
    assert_eq!(
        outcomes,
        vec![Outcome::Committed, Outcome::Committed, Outcome::Aborted]
    );
    assert_eq!(common::read_bytes(&db, pages[2], 0, 2)?, vec![0, 2]);
    assert_eq!(common::read_bytes(&db, pages[0], 0, 2)?, vec![1, 0]);
    Ok(())
}

#[test]
fn test_lock_wait_timeout() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let mut config = test_config(dir.path(), 8);
    config.lock_manager.lock_wait_timeout = Some(Duration::from_millis(50));
    let db = Database::open(config)?;
    let pages = setup_pages(&db, 1, 1, 0)?;

    let holder = db.begin()?;
    db.write_page_bytes(&holder, pages[0], 0, b"held")?;

    // No cycle, the holder just never lets go
    let waiter = db.begin()?;
    let err = db
        .fetch_page(&waiter, pages[0], LockMode::Shared)
        .err()
        .expect("wait should time out");
    assert!(err.is_transaction_aborted());
    assert!(matches!(
        err,
        DatabaseError::TransactionAborted {
            source: LockError::Timeout { .. },
            ..
        }
    ));
    assert_eq!(db.buffer_pool().lock_manager().waiting_count(pages[0]), 0);

    // A timed-out waiter is told to abort just like a deadlock victim
    let refused = db.commit(&waiter).err().expect("timed-out commit should be refused");
    assert!(refused.is_transaction_aborted());

    db.abort(&waiter)?;
    db.commit(&holder)?;
    Ok(())
}

#[test]
fn test_concurrent_transfers_preserve_total() -> Result<()> {
    const ACCOUNTS: usize = 5;
    const THREADS: u64 = 4;
    const TRANSFERS: usize = 30;
    const INITIAL: u64 = 100;

    let (db, _dir) = create_test_db(16)?;
    let db = Arc::new(db);

    let setup = db.begin()?;
    let mut accounts = Vec::with_capacity(ACCOUNTS);
    for _ in 0..ACCOUNTS {
        let page_id = db.allocate_page(1)?;
        db.write_page_bytes(&setup, page_id, 0, &INITIAL.to_le_bytes())?;
        accounts.push(page_id);
    }
    db.commit(&setup)?;
    let accounts = Arc::new(accounts);

    let handles: Vec<_> = (0..THREADS)
        .map(|seed| {
            let db = Arc::clone(&db);
            let accounts = Arc::clone(&accounts);
            thread::spawn(move || -> Result<usize> {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut retries = 0;
                for _ in 0..TRANSFERS {
                    let from = accounts[rng.gen_range(0..ACCOUNTS)];
                    let to = accounts[rng.gen_range(0..ACCOUNTS)];
                    if from == to {
                        continue;
                    }
                    // Retry until the transfer goes through
                    loop {
                        let txn = db.begin()?;
                        let outcome = run_txn(&db, &txn, || {
                            let balance = read_u64(&db, &txn, from)?;
                            if balance == 0 {
                                return Ok(());
                            }
                            let other = read_u64(&db, &txn, to)?;
                            db.write_page_bytes(&txn, from, 0, &(balance - 1).to_le_bytes())?;
                            db.write_page_bytes(&txn, to, 0, &(other + 1).to_le_bytes())?;
                            Ok(())
                        })?;
                        if outcome == Outcome::Committed {
                            break;
                        }
                        retries += 1;
                    }
                }
                Ok(retries)
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    let mut total = 0;
    for &page_id in accounts.iter() {
        total += read_counter(&db, page_id)?;
    }
    assert_eq!(total, INITIAL * ACCOUNTS as u64);
    Ok(())
}
