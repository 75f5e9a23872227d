//! The Conductor: periodic sync scheduler plus the continuous processing
//! worker.
//!
//! Two long-lived loops share the store. The sync loop wakes every 7 days
//! (2-day cooldown after a fatal error), walks active cities grouped by
//! vendor with vendor-aware rate limiting and activity-based gating, and
//! enqueues discovered packets. The processing loop drains the queue one
//! entry at a time. `stop()` flips a running flag checked at loop heads;
//! both loops exit within their current iteration.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;

use crate::config::Config;
use crate::db::{Database, StoreStats};
use crate::error::{DbError, SyncError};
use crate::processor::AgendaProcessor;
use crate::types::{AgendaItem, City, FetchedMeeting, Meeting, ProcessingStatus, Vendor};
use crate::validator::validate_meeting;
use crate::vendors::{adapter_for, generate_meeting_id, parse_vendor_date, SyncWindow};

/// Sync cadence.
const SYNC_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
const ERROR_COOLDOWN_SECS: u64 = 2 * 24 * 60 * 60;

/// Processing loop sleeps.
const EMPTY_QUEUE_SLEEP_SECS: u64 = 5;
const ERROR_SLEEP_SECS: u64 = 2;

/// Bounded sync-status map.
const MAX_SYNC_STATUS_ENTRIES: usize = 100;

/// Vendor-aware rate limiter. Minimum spacing between requests to the same
/// vendor, plus up to a second of jitter, enforced through a mutex-guarded
/// per-vendor last-request map.
pub struct RateLimiter {
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            last_request: Mutex::new(HashMap::new()),
        }
    }

    fn min_delay(vendor: &str) -> Duration {
        let secs = match vendor {
            "primegov" | "civicclerk" | "legistar" => 3.0,
            "granicus" | "civicplus" | "novusagenda" => 4.0,
            _ => 5.0,
        };
        Duration::from_secs_f64(secs)
    }

    /// Sleep long enough that two successive requests to the same vendor are
    /// at least the vendor's minimum delay apart.
    pub async fn wait_if_needed(&self, vendor: &str) {
        let sleep_for = {
            let map = self.last_request.lock().expect("rate limiter lock");
            map.get(vendor).and_then(|last| {
                let min_delay = Self::min_delay(vendor);
                let elapsed = last.elapsed();
                if elapsed < min_delay {
                    let jitter = rand::thread_rng().gen_range(0.0..1.0);
                    Some(min_delay - elapsed + Duration::from_secs_f64(jitter))
                } else {
                    None
                }
            })
        };

        if let Some(sleep_for) = sleep_for {
            log::info!(
                "Rate limiting {}: sleeping {:.1}s",
                vendor,
                sleep_for.as_secs_f64()
            );
            tokio::time::sleep(sleep_for).await;
        }

        self.last_request
            .lock()
            .expect("rate limiter lock")
            .insert(vendor.to_string(), Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub banana: String,
    pub status: SyncStatus,
    pub meetings_found: usize,
    pub meetings_stored: usize,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
}

impl SyncResult {
    fn skipped(banana: &str, reason: &str) -> SyncResult {
        SyncResult {
            banana: banana.to_string(),
            status: SyncStatus::Skipped,
            meetings_found: 0,
            meetings_stored: 0,
            duration_seconds: 0.0,
            error_message: Some(reason.to_string()),
        }
    }

    fn failed(banana: &str, error: String) -> SyncResult {
        SyncResult {
            banana: banana.to_string(),
            status: SyncStatus::Failed,
            meetings_found: 0,
            meetings_stored: 0,
            duration_seconds: 0.0,
            error_message: Some(error),
        }
    }
}

/// Status snapshot exposed by the control surface.
#[derive(Debug, serde::Serialize)]
pub struct ConductorStatus {
    pub is_running: bool,
    pub last_full_sync: Option<String>,
    pub failed_cities: Vec<String>,
    #[serde(flatten)]
    pub stats: StoreStats,
}

pub struct Conductor {
    db: Arc<Mutex<Database>>,
    config: Config,
    processor: Option<Arc<AgendaProcessor>>,
    rate_limiter: RateLimiter,
    running: AtomicBool,
    failed_cities: Mutex<HashSet<String>>,
    sync_status: Mutex<HashMap<String, String>>,
    last_full_sync: Mutex<Option<chrono::DateTime<Utc>>>,
}

impl Conductor {
    /// Construct with an optional processor; without one, sync still runs
    /// and meetings queue up unprocessed.
    pub fn new(
        db: Arc<Mutex<Database>>,
        config: Config,
        processor: Option<Arc<AgendaProcessor>>,
    ) -> Self {
        if processor.is_none() {
            log::warn!("LLM processor not available - summaries will be skipped");
        }
        Conductor {
            db,
            config,
            processor,
            rate_limiter: RateLimiter::new(),
            running: AtomicBool::new(false),
            failed_cities: Mutex::new(HashSet::new()),
            sync_status: Mutex::new(HashMap::new()),
            last_full_sync: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        log::info!("Stopping conductor...");
        self.running.store(false, Ordering::Relaxed);
    }

    fn lock_db(&self) -> Result<std::sync::MutexGuard<'_, Database>, DbError> {
        self.db
            .lock()
            .map_err(|_| DbError::Corrupt("db lock poisoned".to_string()))
    }

    /// Run both loops until `stop()`. The caller owns the single Conductor
    /// instance for its process lifetime.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);

        let sync = {
            let conductor = Arc::clone(&self);
            tokio::spawn(async move { conductor.sync_loop().await })
        };
        let processing = {
            let conductor = Arc::clone(&self);
            tokio::spawn(async move { conductor.processing_loop().await })
        };

        let _ = tokio::join!(sync, processing);
        log::info!("Conductor stopped");
    }

    // -----------------------------------------------------------------------
    // Sync loop
    // -----------------------------------------------------------------------

    async fn sync_loop(&self) {
        while self.is_running() {
            let cooldown = match self.run_full_sync().await {
                Ok(()) => SYNC_INTERVAL_SECS,
                Err(e) => {
                    log::error!("Sync loop error: {}", e);
                    ERROR_COOLDOWN_SECS
                }
            };

            // Sleep in 1s steps so stop() is honored promptly
            for _ in 0..cooldown {
                if !self.is_running() {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// One full pass over all active cities, grouped by vendor.
    pub async fn run_full_sync(&self) -> Result<(), SyncError> {
        let start = Instant::now();
        log::info!("Starting polite city sync...");

        {
            let mut status = self.sync_status.lock().expect("status lock");
            if status.len() > MAX_SYNC_STATUS_ENTRIES {
                status.clear();
            }
        }
        self.failed_cities.lock().expect("failed lock").clear();

        let cities = self.lock_db()?.get_cities("active")?;
        log::info!("Syncing {} cities with rate limiting...", cities.len());

        let mut by_vendor: HashMap<Vendor, Vec<City>> = HashMap::new();
        let mut skipped = 0usize;
        for city in cities {
            if city.vendor.is_supported() {
                by_vendor.entry(city.vendor.clone()).or_default().push(city);
            } else {
                skipped += 1;
                log::debug!(
                    "Skipping city {} with unsupported vendor: {}",
                    city.name,
                    city.vendor
                );
            }
        }

        let total: usize = by_vendor.values().map(Vec::len).sum();
        log::info!(
            "Processing {} cities with supported adapters, skipping {} unsupported",
            total,
            skipped
        );

        let mut results: Vec<SyncResult> = Vec::new();

        for (vendor, vendor_cities) in by_vendor {
            if !self.is_running() {
                break;
            }

            let sorted = self.prioritize_cities(vendor_cities);
            log::info!(
                "Syncing {} {} cities (prioritized by activity)",
                sorted.len(),
                vendor
            );

            for city in &sorted {
                if !self.is_running() {
                    break;
                }

                if !self.should_sync_city(city) {
                    log::debug!("Skipping {} - doesn't need sync yet", city.name);
                    results.push(SyncResult::skipped(&city.banana, "not due for sync"));
                    continue;
                }

                self.rate_limiter.wait_if_needed(vendor.as_str()).await;

                let result = self.sync_city_with_retry(city, 2).await;
                log::info!("Sync completed for {}: {:?}", city.banana, result.status);

                if result.status == SyncStatus::Failed {
                    self.failed_cities
                        .lock()
                        .expect("failed lock")
                        .insert(city.banana.clone());
                }
                {
                    let mut status = self.sync_status.lock().expect("status lock");
                    status.insert(city.banana.clone(), format!("{:?}", result.status));
                }
                results.push(result);

                if results.len() % 10 == 0 {
                    log_memory_usage(&format!("After {} cities", results.len()));
                }
            }

            if !sorted.is_empty() {
                // Break between vendor groups to be extra polite
                let pause = 30.0 + rand::thread_rng().gen_range(0.0..10.0);
                log::info!("Completed {} cities, taking {:.1}s break...", vendor, pause);
                log_memory_usage(&format!("After {} vendor group", vendor));
                tokio::time::sleep(Duration::from_secs_f64(pause)).await;
            }
        }

        let total_meetings: usize = results.iter().map(|r| r.meetings_found).sum();
        let total_stored: usize = results.iter().map(|r| r.meetings_stored).sum();
        let failed = self.failed_cities.lock().expect("failed lock").clone();

        log::info!(
            "Polite sync completed in {:.1}s: {} meetings found, {} stored, {} cities failed",
            start.elapsed().as_secs_f64(),
            total_meetings,
            total_stored,
            failed.len()
        );
        if !failed.is_empty() {
            let mut names: Vec<&str> = failed.iter().map(String::as_str).collect();
            names.sort_unstable();
            log::warn!("Failed cities: {}", names.join(", "));
        }

        *self.last_full_sync.lock().expect("sync lock") = Some(Utc::now());
        Ok(())
    }

    /// Activity-based sync gate: the threshold since the last sync scales
    /// with the last 30 days' meeting count.
    fn should_sync_city(&self, city: &City) -> bool {
        let check = || -> Result<bool, DbError> {
            let db = self.lock_db()?;
            let recent = db.get_city_meeting_frequency(&city.banana, 30)?;
            let last_sync = db.get_city_last_sync(&city.banana)?;

            let Some(last_sync) = last_sync else {
                return Ok(true); // never synced
            };

            let hours = (Utc::now() - last_sync).num_seconds() as f64 / 3600.0;
            Ok(match recent {
                n if n >= 8 => hours >= 12.0,  // high activity: 2+/week
                n if n >= 4 => hours >= 24.0,  // medium: 1+/week
                n if n >= 1 => hours >= 168.0, // low: weekly
                _ => hours >= 168.0,           // dormant: weekly
            })
        };

        match check() {
            Ok(due) => due,
            Err(e) => {
                log::warn!("Error checking sync schedule for {}: {}", city.banana, e);
                true // sync on error to be safe
            }
        }
    }

    /// Order cities by sync priority: activity plus time pressure.
    /// Never-synced cities jump the line.
    fn prioritize_cities(&self, mut cities: Vec<City>) -> Vec<City> {
        let score = |city: &City| -> f64 {
            let compute = || -> Result<f64, DbError> {
                let db = self.lock_db()?;
                let recent = db.get_city_meeting_frequency(&city.banana, 30)? as f64;
                let last_sync = db.get_city_last_sync(&city.banana)?;

                let Some(last_sync) = last_sync else {
                    return Ok(1000.0);
                };
                let hours = (Utc::now() - last_sync).num_seconds() as f64 / 3600.0;
                Ok(recent * 10.0 + (hours / 24.0).min(10.0))
            };
            compute().unwrap_or(100.0)
        };

        cities.sort_by(|a, b| {
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        cities
    }

    async fn sync_city_with_retry(&self, city: &City, max_attempts: u32) -> SyncResult {
        let wait_times = [5.0, 20.0];

        for attempt in 0..max_attempts {
            let result = self.sync_city(city).await;

            match result.status {
                SyncStatus::Completed | SyncStatus::Skipped => return result,
                SyncStatus::Failed if attempt + 1 < max_attempts => {
                    let wait = wait_times[(attempt as usize).min(wait_times.len() - 1)]
                        + rand::thread_rng().gen_range(0.0..2.0);
                    log::warn!(
                        "Sync failed for {} (attempt {}/{}), retrying in {:.1}s: {}",
                        city.name,
                        attempt + 1,
                        max_attempts,
                        wait,
                        result.error_message.as_deref().unwrap_or("unknown")
                    );
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
                SyncStatus::Failed => {
                    log::error!(
                        "Final sync failure for {} after {} attempts: {}",
                        city.name,
                        max_attempts,
                        result.error_message.as_deref().unwrap_or("unknown")
                    );
                    return result;
                }
            }
        }

        SyncResult::failed(&city.banana, "unknown retry error".to_string())
    }

    /// Sync one city: open a fresh adapter, stream meetings, validate and
    /// store each, and enqueue anything processable. Per-meeting errors are
    /// logged and skipped; other meetings continue.
    async fn sync_city(&self, city: &City) -> SyncResult {
        let start = Instant::now();

        let adapter = match adapter_for(city, &self.config) {
            Ok(adapter) => adapter,
            Err(SyncError::Configuration(msg)) => {
                log::debug!("Skipping {}: {}", city.banana, msg);
                return SyncResult::skipped(&city.banana, &msg);
            }
            Err(e) => return SyncResult::failed(&city.banana, e.to_string()),
        };

        log::info!("Syncing {} with {}", city.banana, city.vendor);

        let meetings = match adapter.fetch_meetings(SyncWindow::default()).await {
            Ok(meetings) => meetings,
            Err(e) => {
                log::error!("Error fetching meetings for {}: {}", city.banana, e);
                return SyncResult::failed(&city.banana, e.to_string());
            }
        };

        let with_packets = meetings
            .iter()
            .filter(|m| m.packet_url().is_some())
            .count();
        log::info!(
            "Found {} total meetings for {}, {} have packets",
            meetings.len(),
            city.banana,
            with_packets
        );

        let mut stored = 0usize;
        for fetched in &meetings {
            if !self.is_running() {
                break;
            }
            match self.store_fetched_meeting(city, fetched) {
                Ok(()) => stored += 1,
                Err(e) => {
                    log::error!(
                        "Error storing meeting '{}' for {}: {}",
                        fetched.title,
                        city.banana,
                        e
                    );
                }
            }
        }

        if let Err(e) = self.lock_db().and_then(|db| {
            db.touch_city_last_sync(&city.banana)?;
            Ok(())
        }) {
            log::warn!("Failed to record last sync for {}: {}", city.banana, e);
        }

        log::info!(
            "Synced {}: {} meetings found, {} stored",
            city.banana,
            meetings.len(),
            stored
        );
        log_memory_usage(&format!("After {}", city.banana));

        SyncResult {
            banana: city.banana.clone(),
            status: SyncStatus::Completed,
            meetings_found: meetings.len(),
            meetings_stored: stored,
            duration_seconds: start.elapsed().as_secs_f64(),
            error_message: None,
        }
    }

    /// Validate, upsert the meeting plus any items, and enqueue. The store
    /// assigns nothing here that isn't deterministic: repeated syncs are
    /// idempotent.
    fn store_fetched_meeting(&self, city: &City, fetched: &FetchedMeeting) -> Result<(), DbError> {
        if let Err(e) = validate_meeting(fetched) {
            log::warn!("Skipping corrupted meeting '{}': {}", fetched.title, e);
            return Ok(());
        }

        let date = fetched
            .start
            .as_deref()
            .and_then(parse_vendor_date)
            .map(|d| d.and_utc());

        let meeting_id = if fetched.meeting_id.is_empty() {
            generate_meeting_id(
                &city.slug,
                &fetched.title,
                date.map(|d| d.naive_utc()),
                None,
            )
        } else {
            fetched.meeting_id.clone()
        };

        let meeting = Meeting {
            id: meeting_id.clone(),
            banana: city.banana.clone(),
            title: fetched.title.clone(),
            date,
            packet_url: fetched.packet_url().cloned(),
            agenda_url: fetched.agenda_url().map(str::to_string),
            summary: None,
            topics: None,
            status: fetched.status,
            processing_status: ProcessingStatus::Pending,
            processing_method: None,
            processing_time: None,
            participation: fetched.participation.clone(),
            location: fetched.location.clone(),
        };

        let db = self.lock_db()?;
        db.upsert_meeting(&meeting)?;
        log::debug!("Stored meeting: {} (id: {})", meeting.title, meeting.id);

        if let crate::types::AgendaSource::Items { items, .. } = &fetched.source {
            let agenda_items: Vec<AgendaItem> = items
                .iter()
                .map(|item| AgendaItem {
                    id: AgendaItem::compose_id(&meeting_id, &item.vendor_item_id),
                    meeting_id: meeting_id.clone(),
                    title: item.title.clone(),
                    sequence: item.sequence,
                    attachments: item.attachments.clone(),
                    summary: None,
                    topics: None,
                    matter_id: item.matter_id.clone(),
                    matter_file: item.matter_file.clone(),
                    matter_type: item.matter_type.clone(),
                    sponsors: if item.sponsors.is_empty() {
                        None
                    } else {
                        Some(item.sponsors.clone())
                    },
                    section: None,
                    item_number: item.agenda_number.clone(),
                })
                .collect();

            if !agenda_items.is_empty() {
                let count = db.store_agenda_items(&agenda_items)?;
                log::debug!("Stored {} agenda items for {}", count, meeting.title);
            }
        }

        // Enqueue anything processable: packet, or the agenda document
        // backing the extracted items
        let queue_key = meeting
            .packet_url
            .as_ref()
            .map(|p| p.canonical_key())
            .or_else(|| meeting.agenda_url.clone());

        if let Some(queue_key) = queue_key {
            let days_old = match meeting.date {
                Some(d) => (Utc::now() - d).num_days().max(0),
                None => 999,
            };
            let priority = (100 - days_old).max(0);

            db.enqueue_for_processing(&queue_key, &meeting.id, &city.banana, priority)?;
            log::debug!("Enqueued {} with priority {}", queue_key, priority);
        } else {
            log::debug!("Meeting has no packet - stored for display only");
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Processing loop
    // -----------------------------------------------------------------------

    async fn processing_loop(&self) {
        let Some(processor) = self.processor.clone() else {
            log::warn!("Processor not available - processing loop will not run");
            return;
        };

        log::info!("Starting queue processor...");

        while self.is_running() {
            let job = match self.lock_db().and_then(|db| db.get_next_for_processing(None)) {
                Ok(job) => job,
                Err(e) => {
                    log::error!("Queue processor error: {}", e);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    continue;
                }
            };

            let Some(job) = job else {
                tokio::time::sleep(Duration::from_secs(EMPTY_QUEUE_SLEEP_SECS)).await;
                continue;
            };

            log::info!("Processing queue job {}: {}", job.id, job.packet_url);

            if let Err(e) = self.process_queue_entry(&processor, &job.meeting_id).await {
                self.record_job_failure(job.id, &job.meeting_id, &e);
                log::error!("Queue job {} failed: {}", job.id, e);
                tokio::time::sleep(Duration::from_secs(ERROR_SLEEP_SECS)).await;
            } else {
                if let Ok(db) = self.lock_db() {
                    let _ = db.mark_processing_complete(job.id);
                }
                log::info!("Queue job {} completed successfully", job.id);
            }
        }
    }

    /// Record a job failure against the queue; when the retry budget is
    /// exhausted the meeting row itself is flipped to failed so readers see
    /// a terminal state.
    fn record_job_failure(&self, queue_id: i64, meeting_id: &str, error: &str) {
        if let Ok(db) = self.lock_db() {
            let _ = db.mark_processing_failed(queue_id, error, true);
            if let Ok(Some(entry)) = db.get_queue_entry(queue_id) {
                if entry.status == "failed" {
                    let _ = db.set_meeting_processing_status(meeting_id, ProcessingStatus::Failed);
                }
            }
        }
    }

    async fn process_queue_entry(
        &self,
        processor: &AgendaProcessor,
        meeting_id: &str,
    ) -> Result<(), String> {
        let meeting = self
            .lock_db()
            .and_then(|db| db.get_meeting(meeting_id))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Meeting not found in database: {}", meeting_id))?;

        let outcome = processor
            .process_meeting_auto(&meeting)
            .await
            .map_err(|e| e.to_string())?;

        log::info!(
            "Processed {} via {} in {:.1}s{}",
            meeting.id,
            outcome.processing_method,
            outcome.processing_time,
            if outcome.cached { " (cached)" } else { "" }
        );
        Ok(())
    }

    /// Record a meeting as permanently failed on the meeting row itself
    /// when the queue exhausts its retries.
    pub fn mark_meeting_failed(&self, meeting_id: &str) {
        if let Ok(db) = self.lock_db() {
            let _ = db.set_meeting_processing_status(meeting_id, ProcessingStatus::Failed);
        }
    }

    // -----------------------------------------------------------------------
    // Control surface
    // -----------------------------------------------------------------------

    pub fn sync_status(&self) -> Result<ConductorStatus, DbError> {
        let stats = self.lock_db()?.stats()?;
        let mut failed: Vec<String> = self
            .failed_cities
            .lock()
            .expect("failed lock")
            .iter()
            .cloned()
            .collect();
        failed.sort();

        Ok(ConductorStatus {
            is_running: self.is_running(),
            last_full_sync: self
                .last_full_sync
                .lock()
                .expect("sync lock")
                .map(|t| t.to_rfc3339()),
            failed_cities: failed,
            stats,
        })
    }

    /// Force-sync one city regardless of the activity gate.
    pub async fn force_sync_city(&self, banana: &str) -> SyncResult {
        let city = match self.lock_db().and_then(|db| db.get_city(banana)) {
            Ok(Some(city)) => city,
            Ok(None) => return SyncResult::failed(banana, "City not found".to_string()),
            Err(e) => return SyncResult::failed(banana, e.to_string()),
        };

        let was_running = self.running.swap(true, Ordering::Relaxed);
        let result = self.sync_city_with_retry(&city, 2).await;
        self.running.store(was_running, Ordering::Relaxed);

        let mut failed = self.failed_cities.lock().expect("failed lock");
        if result.status == SyncStatus::Failed {
            failed.insert(banana.to_string());
        } else {
            failed.remove(banana);
        }

        result
    }

    /// Sync a city, then immediately drain its queued jobs.
    pub async fn sync_and_process_city(&self, banana: &str) -> Result<(usize, usize), String> {
        log::info!("Starting sync-and-process for {}", banana);

        let sync_result = self.force_sync_city(banana).await;
        if sync_result.status != SyncStatus::Completed {
            return Err(format!(
                "Sync failed for {}: {}",
                banana,
                sync_result.error_message.unwrap_or_default()
            ));
        }
        log::info!("Sync complete: {} meetings found", sync_result.meetings_found);

        let Some(processor) = self.processor.clone() else {
            log::warn!("Processor not available - meetings queued but not processed");
            return Ok((0, 0));
        };

        let was_running = self.running.swap(true, Ordering::Relaxed);
        let mut processed = 0usize;
        let mut failed = 0usize;

        loop {
            let job = self
                .lock_db()
                .and_then(|db| db.get_next_for_processing(Some(banana)))
                .map_err(|e| e.to_string())?;
            let Some(job) = job else { break };

            log::info!("Processing job {}: {}", job.id, job.packet_url);
            match self.process_queue_entry(&processor, &job.meeting_id).await {
                Ok(()) => {
                    if let Ok(db) = self.lock_db() {
                        let _ = db.mark_processing_complete(job.id);
                    }
                    processed += 1;
                }
                Err(e) => {
                    self.record_job_failure(job.id, &job.meeting_id, &e);
                    failed += 1;
                    log::error!("Failed to process {}: {}", job.packet_url, e);
                }
            }
        }

        self.running.store(was_running, Ordering::Relaxed);
        log::info!(
            "Processing complete for {}: {} succeeded, {} failed",
            banana,
            processed,
            failed
        );
        Ok((processed, failed))
    }

    /// Force-process one meeting by packet URL.
    pub async fn force_process_meeting(&self, packet_url: &str) -> bool {
        let Some(processor) = self.processor.clone() else {
            return false;
        };

        let meeting = match self
            .lock_db()
            .and_then(|db| db.get_meeting_by_packet_url(packet_url))
        {
            Ok(Some(meeting)) => meeting,
            Ok(None) => return false,
            Err(e) => {
                log::error!("Error loading meeting for {}: {}", packet_url, e);
                return false;
            }
        };

        match processor.process_meeting_auto(&meeting).await {
            Ok(_) => true,
            Err(e) => {
                log::error!("Error force processing {}: {}", packet_url, e);
                false
            }
        }
    }

    /// Process every unprocessed meeting in batches.
    pub async fn process_all_unprocessed(&self, batch_size: i64) -> usize {
        let Some(processor) = self.processor.clone() else {
            log::error!("LLM processor not available - cannot process summaries");
            return 0;
        };

        log::info!("Starting to process ALL unprocessed meetings...");
        let mut total = 0usize;
        let mut batch_count = 0usize;

        loop {
            let unprocessed = match self
                .lock_db()
                .and_then(|db| db.get_unprocessed_meetings(batch_size))
            {
                Ok(meetings) => meetings,
                Err(e) => {
                    log::error!("Failed to load unprocessed meetings: {}", e);
                    break;
                }
            };

            if unprocessed.is_empty() {
                log::info!("No more unprocessed meetings found. Total processed: {}", total);
                break;
            }

            batch_count += 1;
            let batch_len = unprocessed.len();
            log::info!("Processing batch {}: {} meetings", batch_count, batch_len);

            for meeting in unprocessed {
                match processor.process_meeting_auto(&meeting).await {
                    Ok(outcome) => {
                        total += 1;
                        log::info!(
                            "Processed {} in {:.1}s",
                            meeting.id,
                            outcome.processing_time
                        );
                    }
                    Err(e) => {
                        self.mark_meeting_failed(&meeting.id);
                        log::error!("Failed to process {}: {}", meeting.id, e);
                    }
                }
            }

            if batch_len == batch_size as usize {
                log::info!("Waiting 10 seconds before next batch...");
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        }

        log::info!("Finished processing all unprocessed meetings. Total: {}", total);
        total
    }
}

/// Log resident memory between vendor groups. Linux-only; a no-op
/// elsewhere.
fn log_memory_usage(context: &str) {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss_pages) = statm.split_whitespace().nth(1) {
                if let Ok(pages) = rss_pages.parse::<u64>() {
                    let mb = pages * 4096 / 1024 / 1024;
                    log::info!("[Memory] {}: {}MB RSS", context, mb);
                    return;
                }
            }
        }
        log::debug!("[Memory] {}: unavailable", context);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = context;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_city, test_db};

    fn test_conductor() -> Conductor {
        let db = Arc::new(Mutex::new(test_db()));
        let config = Config {
            llm_api_key: None,
            nyc_legistar_token: None,
            data_dir: std::env::temp_dir(),
            batch_enabled: true,
        };
        Conductor::new(db, config, None)
    }

    #[tokio::test]
    async fn test_rate_limiter_enforces_vendor_spacing() {
        tokio::time::pause();
        let limiter = RateLimiter::new();

        let before = Instant::now();
        limiter.wait_if_needed("primegov").await;
        // First request goes through immediately
        assert!(before.elapsed() < Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        limiter.wait_if_needed("primegov").await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(3),
            "second primegov call must wait >= 3s, waited {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_rate_limiter_unknown_vendor_gets_longest_delay() {
        tokio::time::pause();
        let limiter = RateLimiter::new();
        limiter.wait_if_needed("escribe").await;

        let start = tokio::time::Instant::now();
        limiter.wait_if_needed("escribe").await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_rate_limiter_vendors_independent() {
        tokio::time::pause();
        let limiter = RateLimiter::new();
        limiter.wait_if_needed("primegov").await;

        let start = tokio::time::Instant::now();
        limiter.wait_if_needed("legistar").await;
        // Different vendor shouldn't be delayed by primegov's clock
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_should_sync_never_synced_city() {
        let conductor = test_conductor();
        let city = sample_city("paloaltoCA", Vendor::Primegov);
        {
            let db = conductor.db.lock().unwrap();
            db.upsert_city(&city).expect("upsert");
        }
        assert!(conductor.should_sync_city(&city));
    }

    #[test]
    fn test_should_sync_respects_recent_sync() {
        let conductor = test_conductor();
        let city = sample_city("paloaltoCA", Vendor::Primegov);
        {
            let db = conductor.db.lock().unwrap();
            db.upsert_city(&city).expect("upsert");
            db.touch_city_last_sync("paloaltoCA").expect("touch");
        }
        // Just synced, zero recent meetings: weekly cadence applies
        assert!(!conductor.should_sync_city(&city));
    }

    #[test]
    fn test_prioritize_never_synced_first() {
        let conductor = test_conductor();
        let synced = sample_city("paloaltoCA", Vendor::Primegov);
        let mut fresh = sample_city("mountainviewCA", Vendor::Primegov);
        fresh.name = "Mountain View".to_string();

        {
            let db = conductor.db.lock().unwrap();
            db.upsert_city(&synced).expect("upsert");
            db.upsert_city(&fresh).expect("upsert");
            db.touch_city_last_sync("paloaltoCA").expect("touch");
        }

        let ordered = conductor.prioritize_cities(vec![synced, fresh]);
        assert_eq!(ordered[0].banana, "mountainviewCA");
    }

    #[test]
    fn test_store_fetched_meeting_enqueues_packet() {
        use crate::types::{AgendaSource, PacketUrl};

        let conductor = test_conductor();
        let city = sample_city("paloaltoCA", Vendor::Primegov);
        {
            let db = conductor.db.lock().unwrap();
            db.upsert_city(&city).expect("upsert");
        }

        let fetched = FetchedMeeting {
            meeting_id: "42".to_string(),
            title: "City Council".to_string(),
            start: Some(Utc::now().to_rfc3339()),
            status: None,
            source: AgendaSource::Packet {
                packet_url: PacketUrl::Single("https://example.com/packet.pdf".to_string()),
            },
            participation: None,
            location: None,
        };

        conductor
            .store_fetched_meeting(&city, &fetched)
            .expect("store");

        let db = conductor.db.lock().unwrap();
        let meeting = db.get_meeting("42").expect("get").expect("exists");
        assert_eq!(meeting.banana, "paloaltoCA");

        let entry = db
            .get_next_for_processing(None)
            .expect("pull")
            .expect("queued");
        assert_eq!(entry.packet_url, "https://example.com/packet.pdf");
        // Today's meeting gets top-of-range priority
        assert_eq!(entry.priority, 100);
    }

    #[test]
    fn test_store_fetched_meeting_idempotent_queue() {
        use crate::types::{AgendaSource, PacketUrl};

        let conductor = test_conductor();
        let city = sample_city("paloaltoCA", Vendor::Primegov);

        let fetched = FetchedMeeting {
            meeting_id: "42".to_string(),
            title: "City Council".to_string(),
            start: None,
            status: None,
            source: AgendaSource::Packet {
                packet_url: PacketUrl::Single("https://example.com/packet.pdf".to_string()),
            },
            participation: None,
            location: None,
        };

        conductor.store_fetched_meeting(&city, &fetched).expect("a");
        conductor.store_fetched_meeting(&city, &fetched).expect("b");

        let db = conductor.db.lock().unwrap();
        let meetings: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM meetings", [], |r| r.get(0))
            .expect("count");
        let queued: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM processing_queue", [], |r| r.get(0))
            .expect("count");
        assert_eq!(meetings, 1);
        assert_eq!(queued, 1);
    }

    #[test]
    fn test_store_fetched_meeting_backfills_missing_id() {
        use crate::types::{AgendaSource, PacketUrl};

        let conductor = test_conductor();
        let city = sample_city("paloaltoCA", Vendor::Primegov);

        let fetched = FetchedMeeting {
            meeting_id: String::new(),
            title: "Mayor and Council".to_string(),
            start: Some("2025-06-03".to_string()),
            status: None,
            source: AgendaSource::Packet {
                packet_url: PacketUrl::Single("https://example.com/p.pdf".to_string()),
            },
            participation: None,
            location: None,
        };

        conductor.store_fetched_meeting(&city, &fetched).expect("a");
        // Re-storing the same record lands on the same generated id
        conductor.store_fetched_meeting(&city, &fetched).expect("b");

        let db = conductor.db.lock().unwrap();
        let (count, id): (i64, String) = db
            .conn_ref()
            .query_row("SELECT COUNT(*), MIN(id) FROM meetings", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .expect("row");
        assert_eq!(count, 1);
        assert_eq!(id.len(), 8, "fallback id is the 8-char hash: {}", id);
    }

    #[test]
    fn test_store_fetched_meeting_rejects_corrupt() {
        use crate::types::AgendaSource;

        let conductor = test_conductor();
        let city = sample_city("paloaltoCA", Vendor::Primegov);

        let fetched = FetchedMeeting {
            meeting_id: "43".to_string(),
            title: "   ".to_string(),
            start: None,
            status: None,
            source: AgendaSource::None,
            participation: None,
            location: None,
        };

        conductor
            .store_fetched_meeting(&city, &fetched)
            .expect("store returns ok, drops the record");

        let db = conductor.db.lock().unwrap();
        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM meetings", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_undated_meeting_gets_floor_priority() {
        use crate::types::{AgendaSource, PacketUrl};

        let conductor = test_conductor();
        let city = sample_city("paloaltoCA", Vendor::Primegov);

        let fetched = FetchedMeeting {
            meeting_id: "44".to_string(),
            title: "Undated Meeting".to_string(),
            start: None,
            status: None,
            source: AgendaSource::Packet {
                packet_url: PacketUrl::Single("https://example.com/undated.pdf".to_string()),
            },
            participation: None,
            location: None,
        };
        conductor.store_fetched_meeting(&city, &fetched).expect("store");

        let db = conductor.db.lock().unwrap();
        let entry = db
            .get_next_for_processing(None)
            .expect("pull")
            .expect("queued");
        assert_eq!(entry.priority, 0);
    }

    #[test]
    fn test_status_snapshot() {
        let conductor = test_conductor();
        let status = conductor.sync_status().expect("status");
        assert!(!status.is_running);
        assert!(status.failed_cities.is_empty());
        assert!(status.last_full_sync.is_none());
    }
}
