//! End-to-end allocation behaviour of the tiered pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use parley_pool::{
    BoxError, PoolConfig, PoolError, ResourceFactory, ResourcePool, Tier, factory_fn,
};

#[derive(Debug)]
struct Voice {
    serial: usize,
}

fn voices(counter: Arc<AtomicUsize>) -> impl ResourceFactory<Voice> {
    factory_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            Ok::<_, BoxError>(Voice {
                serial: counter.fetch_add(1, Ordering::SeqCst),
            })
        }
    })
}

fn slow_voices(delay: Duration) -> impl ResourceFactory<Voice> {
    factory_fn(move || async move {
        tokio::time::sleep(delay).await;
        Ok::<_, BoxError>(Voice { serial: 0 })
    })
}

#[tokio::test]
async fn test_tier_ladder_and_exhaustion() -> Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let pool = ResourcePool::new(
        PoolConfig::new("tts").with_size(2).with_max_dedicated(3),
        voices(Arc::clone(&counter)),
    );
    pool.prepare().await?;

    assert_eq!(pool.acquire_for_session("a", None).await?.tier, Tier::Warm);
    assert_eq!(pool.acquire_for_session("b", None).await?.tier, Tier::Warm);
    assert_eq!(pool.acquire_for_session("c", None).await?.tier, Tier::Cold);

    let err = pool.acquire_for_session("d", None).await.unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { active: 3, max: 3, .. }));
    assert!(err.is_retryable());

    assert!(pool.release_session_resource("a").await);
    assert_eq!(pool.acquire_for_session("d", None).await?.tier, Tier::Warm);

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.dedicated_active, 3);
    assert_eq!(snapshot.metrics.warm_allocations, 3);
    assert_eq!(snapshot.metrics.cold_allocations, 1);
    assert_eq!(snapshot.metrics.exhausted, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_acquires_for_one_session_share_a_resource() -> Result<()> {
    let pool = ResourcePool::new(
        PoolConfig::new("tts").with_size(0).with_max_dedicated(8),
        slow_voices(Duration::from_millis(20)),
    );
    pool.prepare().await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.acquire_for_session("shared", None).await
        }));
    }

    let mut allocations = Vec::new();
    for handle in handles {
        allocations.push(handle.await??);
    }

    let cold = allocations.iter().filter(|a| a.tier == Tier::Cold).count();
    assert_eq!(cold, 1);
    assert!(
        allocations
            .iter()
            .all(|a| a.resource.same_as(&allocations[0].resource))
    );
    assert_eq!(pool.snapshot().dedicated_active, 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_sessions_never_exceed_ceiling() -> Result<()> {
    let pool = ResourcePool::new(
        PoolConfig::new("tts").with_size(1).with_max_dedicated(4),
        voices(Arc::new(AtomicUsize::new(0))),
    );
    pool.prepare().await?;

    let mut handles = Vec::new();
    for i in 0..12 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.acquire_for_session(&format!("s{i}"), None).await
        }));
    }

    let mut granted = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => granted += 1,
            Err(PoolError::Exhausted { .. }) => exhausted += 1,
            Err(e) => return Err(e.into()),
        }
    }

    assert_eq!(granted, 4);
    assert_eq!(exhausted, 8);
    assert_eq!(pool.leases().await.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_distinct_from_exhaustion() -> Result<()> {
    let pool = ResourcePool::new(
        PoolConfig::new("tts").with_size(0).with_max_dedicated(2),
        slow_voices(Duration::from_millis(200)),
    );
    pool.prepare().await?;

    let err = pool
        .acquire_for_session("s1", Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::AcquireTimeout { .. }));

    // The abandoned cold creation left nothing bound.
    assert!(pool.leases().await.is_empty());
    assert_eq!(pool.snapshot().metrics.timeouts, 1);
    Ok(())
}

#[tokio::test]
async fn test_released_resource_is_reused_by_next_session() -> Result<()> {
    let pool = ResourcePool::new(
        PoolConfig::new("tts").with_size(1).with_max_dedicated(1),
        voices(Arc::new(AtomicUsize::new(0))),
    );
    pool.prepare().await?;

    let first = pool.acquire_for_session("s1", None).await?;
    assert!(pool.release_session_resource("s1").await);
    let second = pool.acquire_for_session("s2", None).await?;

    assert_eq!(second.tier, Tier::Warm);
    assert!(first.resource.same_as(&second.resource));
    assert_eq!(second.resource.serial, 0);
    Ok(())
}
