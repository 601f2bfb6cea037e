//! Paged listing and the listing fanout.
//!
//! One producer task per [`ListingJob`] drains the server's paginated
//! listing under a shared semaphore and emits [`ListEntry`] records into
//! one bounded channel. The channel closes once every producer has
//! finished (each holds a sender clone; the last drop closes it).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::Sender;
use fancy_regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::storage::Storage;
use crate::types::{ListEntry, ListingJob};

/// Keys requested per LIST call (the protocol maximum).
pub const MAX_KEYS_PER_PAGE: i32 = 1000;

const MAX_LIST_ATTEMPTS: usize = 5;
const LIST_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Legacy SDK artefact: a listing that fails with this message is treated
/// as a clean end of the page sequence rather than an error.
const LEGACY_LIST_TERMINATION_MARKER: &str = "runtime error: index out of range";

/// Shared parameters for one listing invocation.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub delimiter: String,
    pub recursive: bool,
    pub search_depth: usize,
    pub key_regex: Option<Regex>,
    pub max_parallel: usize,
}

/// One LIST request with request-level retries.
///
/// Returns `Ok(None)` when the legacy termination marker is seen, which
/// callers treat as end-of-listing. Transport errors are retried up to
/// [`MAX_LIST_ATTEMPTS`] times with a fixed sleep in between; the last
/// error is then fatal for the invocation.
pub(crate) async fn list_page_with_retry(
    storage: &Storage,
    job: &ListingJob,
    delimiter: Option<&str>,
    continuation_token: Option<String>,
) -> Result<Option<crate::types::ListPage>> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match storage
            .list_page(
                &job.bucket,
                &job.prefix,
                delimiter,
                continuation_token.clone(),
                MAX_KEYS_PER_PAGE,
            )
            .await
        {
            Ok(page) => return Ok(Some(page)),
            Err(e) => {
                if format!("{e:#}").contains(LEGACY_LIST_TERMINATION_MARKER) {
                    warn!(
                        bucket = job.bucket,
                        prefix = job.prefix,
                        "listing for s3://{}/{} reported '{}'; treating as end of listing",
                        job.bucket,
                        job.prefix,
                        LEGACY_LIST_TERMINATION_MARKER,
                    );
                    return Ok(None);
                }
                if attempts >= MAX_LIST_ATTEMPTS {
                    return Err(e);
                }
                warn!(
                    bucket = job.bucket,
                    prefix = job.prefix,
                    attempt = attempts,
                    "list request for s3://{}/{} failed (attempt {}/{}), retrying: {:#}",
                    job.bucket,
                    job.prefix,
                    attempts,
                    MAX_LIST_ATTEMPTS,
                    e,
                );
                tokio::time::sleep(LIST_RETRY_INTERVAL).await;
            }
        }
    }
}

/// Whether an object entry passes the `--key-regex` filter.
///
/// The regex applies to the recomposed full key. Prefix entries are never
/// filtered; callers only consult this for objects.
pub(crate) fn object_matches(options: &ListOptions, entry: &ListEntry) -> bool {
    match &options.key_regex {
        Some(regex) => matches!(regex.is_match(&entry.full_key()), Ok(true)),
        None => true,
    }
}

/// Run the final parallel listing over `jobs`, emitting every entry into
/// `entries`.
///
/// Each producer acquires one gate permit before its first request and
/// holds it while draining its job's pages; producers never spawn further
/// gated work, so the gate cannot deadlock. Recursive jobs list with no
/// delimiter (the server returns all keys without grouping); otherwise
/// common prefixes are emitted as prefix entries, except a prefix equal
/// to the delimiter alone, which represents the listing root.
pub(crate) async fn fan_out(
    storage: &Storage,
    gate: Arc<Semaphore>,
    jobs: Vec<ListingJob>,
    options: Arc<ListOptions>,
    entries: &Sender<ListEntry>,
) -> Result<()> {
    let mut producers = JoinSet::new();

    for job in jobs {
        let storage = dyn_clone::clone_box(&**storage);
        let gate = gate.clone();
        let options = options.clone();
        let entries = entries.clone();

        producers.spawn(async move {
            let _permit = gate.acquire_owned().await.unwrap();
            debug!(
                bucket = job.bucket,
                prefix = job.prefix,
                "listing producer started."
            );
            drain_job(&storage, &job, &options, &entries).await
        });
    }

    while let Some(join_result) = producers.join_next().await {
        match join_result {
            Err(e) => return Err(anyhow::anyhow!("listing producer panicked: {e}")),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

async fn drain_job(
    storage: &Storage,
    job: &ListingJob,
    options: &ListOptions,
    entries: &Sender<ListEntry>,
) -> Result<()> {
    let delimiter = if options.recursive {
        None
    } else {
        Some(options.delimiter.as_str())
    };

    let mut continuation_token: Option<String> = None;
    loop {
        let Some(page) =
            list_page_with_retry(storage, job, delimiter, continuation_token.take()).await?
        else {
            return Ok(());
        };

        for common_prefix in &page.common_prefixes {
            if *common_prefix == options.delimiter {
                continue;
            }
            let entry = ListEntry::prefix(&job.bucket, common_prefix.clone());
            if entries.send(entry).await.is_err() {
                return Ok(());
            }
        }

        for entry in page.objects {
            if !object_matches(options, &entry) {
                continue;
            }
            if entries.send(entry).await.is_err() {
                return Ok(());
            }
        }

        match page.next_continuation_token {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::ObjectStore;
    use crate::types::ListPage;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
    use aws_sdk_s3::primitives::ByteStream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }

    /// Mock storage returning canned listing pages keyed by (prefix,
    /// continuation token), with call counters and a configurable number
    /// of leading failures.
    #[derive(Clone)]
    pub(crate) struct PagedMockStore {
        pub pages: Arc<Vec<ListPage>>,
        pub list_calls: Arc<AtomicUsize>,
        pub failures_before_success: Arc<AtomicUsize>,
        pub failure_message: String,
        pub in_flight: Arc<AtomicUsize>,
        pub max_in_flight: Arc<AtomicUsize>,
    }

    impl PagedMockStore {
        pub fn with_pages(pages: Vec<ListPage>) -> Self {
            Self {
                pages: Arc::new(pages),
                list_calls: Arc::new(AtomicUsize::new(0)),
                failures_before_success: Arc::new(AtomicUsize::new(0)),
                failure_message: "connection reset".to_string(),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn page_index(token: Option<&String>) -> usize {
            token.map(|t| t.parse().unwrap()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl ObjectStore for PagedMockStore {
        async fn list_page(
            &self,
            _bucket: &str,
            _prefix: &str,
            _delimiter: Option<&str>,
            continuation_token: Option<String>,
            _max_keys: i32,
        ) -> Result<ListPage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("{}", self.failure_message));
            }

            let index = Self::page_index(continuation_token.as_ref());
            Ok(self.pages.get(index).cloned().unwrap_or_default())
        }

        async fn get_object(&self, _bucket: &str, _key: &str) -> Result<ByteStream> {
            unimplemented!()
        }

        async fn copy_object(
            &self,
            _src_bucket: &str,
            _src_key: &str,
            _dest_bucket: &str,
            _dest_key: &str,
        ) -> Result<()> {
            unimplemented!()
        }

        async fn delete_objects(
            &self,
            _bucket: &str,
            _keys: Vec<String>,
        ) -> Result<DeleteObjectsOutput> {
            unimplemented!()
        }

        async fn list_buckets(&self) -> Result<Vec<String>> {
            unimplemented!()
        }

        async fn bucket_region(&self, _bucket: &str) -> Result<String> {
            unimplemented!()
        }

        fn region(&self) -> &str {
            "us-east-1"
        }
    }

    fn make_options() -> ListOptions {
        ListOptions {
            delimiter: "/".to_string(),
            recursive: false,
            search_depth: 0,
            key_regex: None,
            max_parallel: 4,
        }
    }

    fn page(objects: Vec<&str>, prefixes: Vec<&str>, next: Option<&str>) -> ListPage {
        ListPage {
            objects: objects
                .into_iter()
                .map(|k| ListEntry::object("demo", k.to_string(), 1, None))
                .collect(),
            common_prefixes: prefixes.into_iter().map(String::from).collect(),
            next_continuation_token: next.map(String::from),
        }
    }

    async fn collect_entries(
        store: PagedMockStore,
        jobs: Vec<ListingJob>,
        options: ListOptions,
    ) -> Vec<ListEntry> {
        let storage: Storage = Box::new(store);
        let (sender, receiver) = async_channel::bounded(100);
        let gate = Arc::new(Semaphore::new(options.max_parallel));
        fan_out(&storage, gate, jobs, Arc::new(options), &sender)
            .await
            .unwrap();
        drop(sender);

        let mut entries = Vec::new();
        while let Ok(entry) = receiver.recv().await {
            entries.push(entry);
        }
        entries
    }

    #[tokio::test]
    async fn drains_all_pages_in_order() {
        init_dummy_tracing_subscriber();

        let store = PagedMockStore::with_pages(vec![
            page(vec!["a/x"], vec!["a/z/"], Some("1")),
            page(vec!["a/y"], vec![], None),
        ]);
        let calls = store.list_calls.clone();

        let entries = collect_entries(
            store,
            vec![ListingJob::new("demo", "a/")],
            make_options(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a/z/", "a/x", "a/y"]);
        assert!(entries[0].is_prefix);
        assert!(!entries[1].is_prefix);
    }

    #[tokio::test]
    async fn suppresses_prefix_equal_to_delimiter() {
        init_dummy_tracing_subscriber();

        let store = PagedMockStore::with_pages(vec![page(vec!["x"], vec!["/", "a/"], None)]);
        let entries =
            collect_entries(store, vec![ListingJob::new("demo", "")], make_options()).await;

        let prefixes: Vec<&str> = entries
            .iter()
            .filter(|e| e.is_prefix)
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(prefixes, vec!["a/"]);
    }

    #[tokio::test]
    async fn key_regex_filters_objects_but_not_prefixes() {
        init_dummy_tracing_subscriber();

        let store = PagedMockStore::with_pages(vec![page(
            vec!["a/app.log", "a/data.csv"],
            vec!["a/z/"],
            None,
        )]);
        let mut options = make_options();
        options.key_regex = Some(Regex::new(r"\.log$").unwrap());

        let entries = collect_entries(store, vec![ListingJob::new("demo", "a/")], options).await;

        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a/z/", "a/app.log"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_five_attempts() {
        init_dummy_tracing_subscriber();

        let store = PagedMockStore::with_pages(vec![page(vec!["a/x"], vec![], None)]);
        store.failures_before_success.store(4, Ordering::SeqCst);
        let calls = store.list_calls.clone();

        let entries = collect_entries(
            store,
            vec![ListingJob::new("demo", "a/")],
            make_options(),
        )
        .await;

        // 4 failures + 1 success
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_after_five_attempts() {
        init_dummy_tracing_subscriber();

        let store = PagedMockStore::with_pages(vec![page(vec!["a/x"], vec![], None)]);
        store.failures_before_success.store(5, Ordering::SeqCst);

        let storage: Storage = Box::new(store);
        let (sender, _receiver) = async_channel::bounded(100);
        let gate = Arc::new(Semaphore::new(1));
        let result = fan_out(
            &storage,
            gate,
            vec![ListingJob::new("demo", "a/")],
            Arc::new(make_options()),
            &sender,
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn legacy_marker_terminates_listing_cleanly() {
        init_dummy_tracing_subscriber();

        let mut store = PagedMockStore::with_pages(vec![page(vec!["a/x"], vec![], None)]);
        store.failure_message = format!("listing blew up: {LEGACY_LIST_TERMINATION_MARKER}");
        store.failures_before_success.store(1, Ordering::SeqCst);
        let calls = store.list_calls.clone();

        let entries = collect_entries(
            store,
            vec![ListingJob::new("demo", "a/")],
            make_options(),
        )
        .await;

        // terminated cleanly on the first call, nothing emitted, no retry
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn gate_bounds_concurrent_producers() {
        init_dummy_tracing_subscriber();

        let store = PagedMockStore::with_pages(vec![page(vec!["x"], vec![], None)]);
        let max_in_flight = store.max_in_flight.clone();

        let jobs: Vec<ListingJob> = (0..8)
            .map(|i| ListingJob::new("demo", format!("p{i}/")))
            .collect();
        let mut options = make_options();
        options.max_parallel = 2;

        let _ = collect_entries(store, jobs, options).await;

        assert!(max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn recursive_listing_uses_no_delimiter() {
        init_dummy_tracing_subscriber();

        #[derive(Clone)]
        struct DelimiterProbe {
            seen: Arc<std::sync::Mutex<Vec<Option<String>>>>,
        }

        #[async_trait]
        impl ObjectStore for DelimiterProbe {
            async fn list_page(
                &self,
                _bucket: &str,
                _prefix: &str,
                delimiter: Option<&str>,
                _continuation_token: Option<String>,
                _max_keys: i32,
            ) -> Result<ListPage> {
                self.seen
                    .lock()
                    .unwrap()
                    .push(delimiter.map(String::from));
                Ok(ListPage::default())
            }

            async fn get_object(&self, _b: &str, _k: &str) -> Result<ByteStream> {
                unimplemented!()
            }
            async fn copy_object(
                &self,
                _sb: &str,
                _sk: &str,
                _db: &str,
                _dk: &str,
            ) -> Result<()> {
                unimplemented!()
            }
            async fn delete_objects(
                &self,
                _b: &str,
                _k: Vec<String>,
            ) -> Result<DeleteObjectsOutput> {
                unimplemented!()
            }
            async fn list_buckets(&self) -> Result<Vec<String>> {
                unimplemented!()
            }
            async fn bucket_region(&self, _b: &str) -> Result<String> {
                unimplemented!()
            }
            fn region(&self) -> &str {
                "us-east-1"
            }
        }

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let storage: Storage = Box::new(DelimiterProbe { seen: seen.clone() });
        let (sender, _receiver) = async_channel::bounded(10);

        let mut options = make_options();
        options.recursive = true;
        fan_out(
            &storage,
            Arc::new(Semaphore::new(1)),
            vec![ListingJob::new("demo", "a/")],
            Arc::new(options),
            &sender,
        )
        .await
        .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[None]);
    }
}
