use std::{
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use kagami::{
    resource::{Resource, SegmentResource},
    util::retry::RetryPolicy,
    Fetched, Fetcher, MaterializeOptions, Materializer, MemorySink, MirrorError, MirrorResult,
};
use url::Url;

use crate::StubFetcher;

fn segments(count: usize) -> anyhow::Result<Vec<Resource>> {
    (0..count)
        .map(|index| {
            Ok(Resource::Segment(SegmentResource {
                uri: Url::parse(&format!("https://example.com/seg{index}.ts"))?,
                file: PathBuf::from(format!("/out/seg{index}.ts")),
                key: None,
            }))
        })
        .collect()
}

fn stub(count: usize) -> StubFetcher {
    (0..count).fold(StubFetcher::new(Duration::from_millis(20)), |fetcher, index| {
        fetcher.page(
            &format!("https://example.com/seg{index}.ts"),
            format!("segment {index}"),
        )
    })
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit() -> anyhow::Result<()> {
    let fetcher = Arc::new(stub(20));
    let sink = MemorySink::new();
    let mut resources = segments(20)?;

    let report = Materializer::new(
        fetcher.clone(),
        sink.clone(),
        MaterializeOptions::new().concurrency(NonZeroUsize::new(3).unwrap()),
    )
    .materialize(&mut resources)
    .await?;

    assert_eq!(report.operations, 20);
    assert_eq!(sink.len(), 20);
    assert_eq!(fetcher.max_in_flight(), 3);
    assert_eq!(sink.get("/out/seg7.ts"), Some(b"segment 7".to_vec()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shared_uri_fetched_once() -> anyhow::Result<()> {
    let fetcher = Arc::new(stub(1));
    let sink = MemorySink::new();
    // byte ranges of one file show up as several segments with the same url
    let mut resources = [segments(1)?, segments(1)?, segments(1)?].concat();

    let report = Materializer::new(fetcher.clone(), sink.clone(), MaterializeOptions::new())
        .materialize(&mut resources)
        .await?;

    assert_eq!(report.operations, 1);
    assert_eq!(fetcher.calls("https://example.com/seg0.ts"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_first_failure_aborts() -> anyhow::Result<()> {
    let fetcher = stub(2);
    let sink = MemorySink::new();
    let mut resources = segments(3)?;

    let error = Materializer::new(fetcher, sink.clone(), MaterializeOptions::new())
        .materialize(&mut resources)
        .await
        .unwrap_err();

    assert_eq!(error.uri(), Some("https://example.com/seg2.ts"));
    assert!(matches!(
        error,
        MirrorError::WithUri { ref source, .. } if matches!(**source, MirrorError::HttpError(_))
    ));
    Ok(())
}

/// Fails with a connection reset a number of times before serving the body.
struct FlakyFetcher {
    failures: AtomicU8,
}

impl Fetcher for FlakyFetcher {
    async fn fetch(&self, _url: &Url, _timeout: Duration) -> MirrorResult<Fetched> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into());
        }
        Ok(Fetched {
            content_type: None,
            body: "recovered".into(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let mut resources = segments(1)?;

    Materializer::new(
        FlakyFetcher {
            failures: AtomicU8::new(2),
        },
        sink.clone(),
        MaterializeOptions::new(),
    )
    .materialize(&mut resources)
    .await?;
    assert_eq!(sink.get("/out/seg0.ts"), Some(b"recovered".to_vec()));

    let result = Materializer::new(
        FlakyFetcher {
            failures: AtomicU8::new(2),
        },
        MemorySink::new(),
        MaterializeOptions::new().retry(RetryPolicy::linear().retries(1)),
    )
    .materialize(&mut resources)
    .await;
    assert!(result.is_err_and(|e| e.is_transient()));
    Ok(())
}
