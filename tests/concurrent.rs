use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use recyclepool::{
    CompressionPools, ElasticConfig, Factory, FixedCachePool, FixedPool, FixedPoolV2, HitCounters,
    HitRatioHook, IntSlicePool, ObjectPool, PooledObject, Trimmer,
};

const THREADS: usize = 8;
const ROUNDS: usize = 5_000;

static LOGGING: Once = Once::new();

fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_log::LogTracer::init();
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

fn latency_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, 60_000_000_000, 3).expect("valid histogram bounds")
}

#[derive(Debug)]
struct Row {
    cells: Vec<u64>,
}

impl PooledObject for Row {
    fn instance(&self) -> Self {
        Row {
            cells: Vec::with_capacity(self.cells.capacity()),
        }
    }

    fn mem_size(&self) -> usize {
        self.cells.capacity() * std::mem::size_of::<u64>()
    }
}

#[test]
fn test_object_pool_under_contention() {
    init_logging();
    tracing::info!("=== object pool: {} threads x {} rounds ===", THREADS, ROUNDS);

    let counters = Arc::new(HitCounters::new());
    let mut pool = ObjectPool::new(
        16,
        Row {
            cells: Vec::with_capacity(8),
        },
        256,
    );
    pool.set_hit_ratio_hook(counters.clone());
    let pool = Arc::new(pool);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut hist = latency_histogram();
                for i in 0..ROUNDS {
                    let start = Instant::now();
                    let mut row = pool.get();
                    hist.record(start.elapsed().as_nanos() as u64).unwrap();

                    // Every seventh row grows past the local size limit.
                    let cells = if (t + i) % 7 == 0 { 64 } else { 4 };
                    row.cells.clear();
                    row.cells.extend((0..cells as u64).map(|c| c + i as u64));
                    assert_eq!(row.cells.len(), cells);
                    pool.put(row);
                }
                hist
            })
        })
        .collect();

    let mut hist = latency_histogram();
    for handle in handles {
        hist.add(handle.join().unwrap()).unwrap();
    }

    let stats = counters.snapshot();
    tracing::info!(
        "gets={} hits={} ratio={:.3} p50={}ns p99={}ns",
        stats.total,
        stats.hit,
        stats.ratio(),
        hist.value_at_quantile(0.5),
        hist.value_at_quantile(0.99)
    );

    assert_eq!(hist.len(), (THREADS * ROUNDS) as u64);
    assert_eq!(stats.total, (THREADS * ROUNDS) as u64);
    assert!(stats.hit <= stats.total);
    assert!(pool.local_len() <= pool.local_capacity());
}

#[test]
fn test_fixed_pool_never_exceeds_capacity() {
    init_logging();

    let built = Arc::new(AtomicUsize::new(0));
    let counters = Arc::new(HitCounters::new());
    let factory_built = built.clone();
    let factory: Factory<Vec<u8>> = Box::new(move || {
        factory_built.fetch_add(1, Ordering::Relaxed);
        vec![0u8; 128]
    });
    let pool = Arc::new(FixedPool::new(
        4,
        Some(factory),
        Some(counters.clone() as Arc<dyn HitRatioHook>),
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let a = pool.get().unwrap();
                    let b = pool.get().unwrap();
                    pool.put(a);
                    pool.put(b);
                    assert!(pool.len() <= 4);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = counters.snapshot();
    assert_eq!(stats.total, (THREADS * ROUNDS * 2) as u64);
    assert_eq!(stats.misses() as usize, built.load(Ordering::Relaxed));
    assert!(pool.len() <= 4);
}

#[test]
fn test_fixed_pool_v2_and_cache_pool_share_load() {
    init_logging();

    let v2 = Arc::new(FixedPoolV2::new(|| String::with_capacity(64), 8));
    let cache = Arc::new(
        FixedCachePool::with_capacity(8)
            .with_elastic_config(ElasticConfig {
                shards: 4,
                max_retained: 64,
            })
            .with_factory(|| String::with_capacity(64)),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let v2 = v2.clone();
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..ROUNDS {
                    let mut s = v2.get();
                    s.clear();
                    s.push_str("fixed");
                    v2.put(s);

                    let mut held: Vec<String> = (0..3).filter_map(|_| cache.get()).collect();
                    assert_eq!(held.len(), 3);
                    for s in held.iter_mut() {
                        s.clear();
                        s.push_str(if (t + i) % 2 == 0 { "even" } else { "odd" });
                    }
                    for s in held {
                        cache.put(s);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(v2.len() <= 8);
    assert!(cache.len() <= cache.capacity());
    assert!(cache.elastic_len() <= 64);
}

#[test]
fn test_slice_pool_buffers_are_private_while_held() {
    init_logging();

    let pool = Arc::new(IntSlicePool::new());
    let handles: Vec<_> = (0..THREADS as i64)
        .map(|t| {
            let pool = pool.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let len = 1 + round % 40;
                    let mut a = pool.get(len);
                    let mut b = pool.get(len);
                    assert_eq!(a.len(), len);
                    assert_eq!(b.len(), len);

                    a.iter_mut().for_each(|x| *x = t);
                    b.iter_mut().for_each(|x| *x = -t - 1);
                    assert!(a.iter().all(|&x| x == t));
                    assert!(b.iter().all(|&x| x == -t - 1));

                    pool.put(a);
                    pool.put(b);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_compression_pools_across_threads() {
    init_logging();

    let counters = Arc::new(HitCounters::new());
    let pools = Arc::new(
        CompressionPools::builder()
            .with_capacity(4)
            .with_hit_ratio_hook(counters.clone())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let pools = pools.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let payload = format!("thread {} message {} ", t, i).repeat(1 + i % 20);

                    let mut gz = Vec::new();
                    let mut w = pools.get_gzip_writer(&mut gz);
                    w.write_all(payload.as_bytes()).unwrap();
                    w.finish().unwrap();
                    pools.put_gzip_writer(w);

                    let mut zs = Vec::new();
                    let mut w = pools.get_zstd_writer(&mut zs).unwrap();
                    w.write_all(payload.as_bytes()).unwrap();
                    w.finish().unwrap();
                    pools.put_zstd_writer(w);

                    let mut sn = Vec::new();
                    let mut w = pools.get_snappy_writer(&mut sn);
                    w.write_all(payload.as_bytes()).unwrap();
                    w.finish().unwrap();
                    pools.put_snappy_writer(w);

                    let mut out = String::new();
                    let mut r = pools.get_gzip_reader(&gz[..]);
                    r.read_to_string(&mut out).unwrap();
                    pools.put_gzip_reader(r);
                    assert_eq!(out, payload);

                    out.clear();
                    let mut r = pools.get_zstd_reader(&zs[..]).unwrap();
                    r.read_to_string(&mut out).unwrap();
                    pools.put_zstd_reader(r);
                    assert_eq!(out, payload);

                    out.clear();
                    let mut r = pools.get_snappy_reader(&sn[..]);
                    r.read_to_string(&mut out).unwrap();
                    pools.put_snappy_reader(r);
                    assert_eq!(out, payload);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = counters.snapshot();
    assert_eq!(stats.total, 4 * 50 * 6);
    assert!(stats.hit <= stats.total);
    assert!(stats.hit > 0);
}

#[test]
fn test_trimmer_drains_idle_pools() {
    init_logging();

    let slices = Arc::new(IntSlicePool::new());
    let cache = Arc::new(FixedCachePool::<Vec<u8>>::with_capacity(1));
    for _ in 0..32 {
        slices.put(Vec::with_capacity(16));
        cache.put(Vec::with_capacity(16));
    }
    assert_eq!(cache.elastic_len(), 31);

    let _trimmer = Trimmer::builder()
        .with_interval(Duration::from_millis(5))
        .register(slices.clone())
        .register(cache.clone())
        .build()
        .unwrap();

    let start = Instant::now();
    while !slices.is_empty() || cache.elastic_len() > 0 {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "trimmer did not drain the pools"
        );
        thread::sleep(Duration::from_millis(5));
    }

    // The fast tier is not subject to trimming.
    assert_eq!(cache.len(), 1);
}
