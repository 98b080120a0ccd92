mod common;

use std::sync::atomic::Ordering;

use common::{connect_and_record, node, MockFactory, Recorder, TestPlatform};
use critical_section as _;
use dma2d_pool::{
    Admission, Direction, Dma2dError, PoolConfig, TransactionDesc, RX_CHANNELS, TX_CHANNELS,
};

fn config(intr_priority: u8) -> PoolConfig {
    PoolConfig { pool_id: 0, intr_priority }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn acquire_brings_group_up() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();

    let pool = platform.acquire_pool(config(0)).await.unwrap();
    assert_eq!(pool.group_id(), 0);
    assert_eq!(platform.ref_count(0), Some(1));
    assert_eq!(counters.bring_ups.load(Ordering::SeqCst), 1);
    assert_eq!(
        counters.live_interrupts.load(Ordering::SeqCst),
        TX_CHANNELS + RX_CHANNELS
    );
    assert_eq!(pool.tx_free_mask().bits(), 0b111);
    assert_eq!(pool.rx_free_mask().bits(), 0b11);
}

#[futures_test::test]
async fn acquire_reuses_live_group() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();

    let p1 = platform.acquire_pool(config(0)).await.unwrap();
    let p2 = platform.acquire_pool(config(0)).await.unwrap();
    assert_eq!(platform.ref_count(0), Some(2));
    assert_eq!(counters.bring_ups.load(Ordering::SeqCst), 1);
    assert_eq!(
        counters.live_interrupts.load(Ordering::SeqCst),
        TX_CHANNELS + RX_CHANNELS
    );

    p1.release().await.unwrap();
    assert_eq!(platform.ref_count(0), Some(1));
    assert_eq!(counters.tear_downs.load(Ordering::SeqCst), 0);

    p2.release().await.unwrap();
    assert_eq!(platform.ref_count(0), Some(0));
    assert_eq!(counters.tear_downs.load(Ordering::SeqCst), 1);
    assert_eq!(counters.live_interrupts.load(Ordering::SeqCst), 0);
}

#[futures_test::test]
async fn acquire_release_cycle() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();

    for i in 1..=3 {
        let pool = platform.acquire_pool(config(0)).await.unwrap();
        platform.release_pool(pool).await.unwrap();
        assert_eq!(counters.bring_ups.load(Ordering::SeqCst), i);
        assert_eq!(counters.tear_downs.load(Ordering::SeqCst), i);
    }
}

#[futures_test::test]
async fn invalid_config_is_rejected() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();

    let bad_pool = PoolConfig { pool_id: 1, intr_priority: 0 };
    assert_eq!(platform.acquire_pool(bad_pool).await.err(), Some(Dma2dError::InvalidArg));
    assert_eq!(platform.acquire_pool(config(4)).await.err(), Some(Dma2dError::InvalidArg));
    assert_eq!(counters.bring_ups.load(Ordering::SeqCst), 0);
    assert_eq!(platform.ref_count(1), None);
}

#[futures_test::test]
async fn first_acquirer_fixes_priority() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();

    let p1 = platform.acquire_pool(config(2)).await.unwrap();
    assert_eq!(counters.last_priority.load(Ordering::SeqCst), 2);

    // Default priority is always accepted, the same one too.
    let p2 = platform.acquire_pool(config(0)).await.unwrap();
    let p3 = platform.acquire_pool(config(2)).await.unwrap();
    assert_eq!(platform.ref_count(0), Some(3));

    assert_eq!(platform.acquire_pool(config(3)).await.err(), Some(Dma2dError::InvalidState));
    assert_eq!(platform.ref_count(0), Some(3));

    p1.release().await.unwrap();
    p2.release().await.unwrap();
    p3.release().await.unwrap();

    // A fresh group takes a new priority.
    let p4 = platform.acquire_pool(config(3)).await.unwrap();
    assert_eq!(counters.last_priority.load(Ordering::SeqCst), 3);
    p4.release().await.unwrap();
}

#[futures_test::test]
async fn priority_conflict_on_fresh_group_tears_it_down() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();

    let p1 = platform.acquire_pool(config(1)).await.unwrap();
    assert!(platform.acquire_pool(config(2)).await.is_err());
    p1.release().await.unwrap();
    assert_eq!(counters.tear_downs.load(Ordering::SeqCst), 1);
    assert_eq!(platform.ref_count(0), Some(0));
}

#[futures_test::test]
async fn bring_up_failure_is_reported() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();
    platform.factory().fail_bring_up.store(true, Ordering::SeqCst);

    assert_eq!(platform.acquire_pool(config(0)).await.err(), Some(Dma2dError::Fail));
    assert_eq!(platform.ref_count(0), Some(0));

    // Flag was consumed, the next attempt succeeds.
    let pool = platform.acquire_pool(config(0)).await.unwrap();
    assert_eq!(counters.bring_ups.load(Ordering::SeqCst), 2);
    pool.release().await.unwrap();
}

#[futures_test::test]
async fn interrupt_failure_rolls_everything_back() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();
    platform.factory().intr_budget.store(3, Ordering::SeqCst);

    assert_eq!(platform.acquire_pool(config(0)).await.err(), Some(Dma2dError::Fail));
    assert_eq!(platform.ref_count(0), Some(0));
    assert_eq!(counters.tear_downs.load(Ordering::SeqCst), 1);
    assert_eq!(counters.live_interrupts.load(Ordering::SeqCst), 0);

    platform.factory().intr_budget.store(usize::MAX, Ordering::SeqCst);
    let pool = platform.acquire_pool(config(0)).await.unwrap();
    assert_eq!(
        counters.live_interrupts.load(Ordering::SeqCst),
        TX_CHANNELS + RX_CHANNELS
    );
    pool.release().await.unwrap();
}

#[futures_test::test]
async fn interrupt_sources_cover_every_channel_rx_first() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();
    // Only the RX lines fit, the first TX line fails.
    platform.factory().intr_budget.store(RX_CHANNELS, Ordering::SeqCst);

    assert!(platform.acquire_pool(config(0)).await.is_err());
    assert_eq!(counters.live_interrupts.load(Ordering::SeqCst), 0);
    assert_eq!(counters.tear_downs.load(Ordering::SeqCst), 1);
}

#[futures_test::test]
async fn release_refused_while_transactions_wait() {
    let platform = TestPlatform::new(MockFactory::new());
    let counters = platform.factory().counters.clone();
    let hw = platform.factory().hw.clone();
    let rec = Recorder::leak();

    let pool = platform.acquire_pool(config(0)).await.unwrap();
    let mut desc = TransactionDesc::new(2, 1, connect_and_record);
    desc.user_config = rec.user_data();

    let first = node();
    let second = node();
    assert_eq!(pool.enqueue(&desc, first).unwrap(), Admission::Dispatched { need_yield: false });
    assert_eq!(pool.enqueue(&desc, second).unwrap(), Admission::Queued);

    let (err, pool) = platform.release_pool(pool).await.unwrap_err();
    assert_eq!(err, Dma2dError::NotAllowed);
    assert_eq!(platform.ref_count(0), Some(1));
    assert_eq!(counters.tear_downs.load(Ordering::SeqCst), 0);

    // Let the in-flight transaction finish; the queued one gets its
    // channels from the same interrupt.
    let rx = rec.picked()[0].last().copied().unwrap();
    assert_eq!(rx.0, Direction::Rx);
    hw.raise(Direction::Rx, rx.1, dma2d_pool::RxEvents::SUC_EOF.bits());
    platform.on_interrupt(0, Direction::Rx, rx.1);
    assert_eq!(pool.pending_len(), 0);

    pool.release().await.unwrap();
    assert_eq!(counters.tear_downs.load(Ordering::SeqCst), 1);
}

#[futures_test::test]
async fn interrupts_for_absent_groups_are_ignored() {
    let platform = TestPlatform::new(MockFactory::new());
    assert!(!platform.on_interrupt(0, Direction::Rx, 0));
    assert!(!platform.on_interrupt(7, Direction::Tx, 0));

    let pool = platform.acquire_pool(config(0)).await.unwrap();
    assert!(!platform.on_interrupt(0, Direction::Tx, 9));
    pool.release().await.unwrap();
    assert!(!platform.on_interrupt(0, Direction::Rx, 0));
}
