//! Processing orchestration: cache lookup → extract → summarize → store.
//!
//! The free-tier pipeline is fail-fast: PDF text extraction plus a direct
//! LLM pass. A packet whose extraction fails quality checks raises a
//! processing error for the queue to count against the retry budget - no
//! premium fallbacks live in this path.
//!
//! DB access is brief-lock: the store mutex is taken to read or write and
//! released before any network call.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::db::Database;
use crate::error::{DbError, ProcessingError};
use crate::filters::{is_low_value_attachment, should_skip_processing};
use crate::http::HttpSession;
use crate::parsing::{chunker, participation::parse_participation_info, pdf};
use crate::summarizer::{ItemRequest, Summarizer};
use crate::topics::{aggregate_topics, TopicNormalizer};
use crate::types::{
    AgendaItem, Attachment, AttachmentKind, Meeting, PacketUrl, ParticipationInfo,
};

/// Thresholds under which a packet is processed monolithically instead of
/// attempting item detection.
const SMALL_PACKET_PAGES: u32 = 10;
const SMALL_PACKET_CHARS: usize = 30_000;

/// Chunk text carried into a detected item's text segment.
const TEXT_SEGMENT_CAP: usize = 5_000;

/// Outcome of processing one meeting.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub summary: String,
    pub processing_time: f64,
    pub cached: bool,
    pub processing_method: String,
}

pub struct AgendaProcessor {
    db: Arc<Mutex<Database>>,
    summarizer: Summarizer,
    normalizer: TopicNormalizer,
    http: HttpSession,
    /// When false, item work goes through single requests instead of the
    /// batch API.
    batch_enabled: bool,
}

impl AgendaProcessor {
    pub fn new(
        db: Arc<Mutex<Database>>,
        summarizer: Summarizer,
        normalizer: TopicNormalizer,
        batch_enabled: bool,
    ) -> Result<Self, ProcessingError> {
        Ok(AgendaProcessor {
            db,
            summarizer,
            normalizer,
            http: HttpSession::new()?,
            batch_enabled,
        })
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Database>, ProcessingError> {
        self.db
            .lock()
            .map_err(|_| ProcessingError::Db(DbError::Corrupt("db lock poisoned".to_string())))
    }

    // -----------------------------------------------------------------------
    // Monolithic path
    // -----------------------------------------------------------------------

    /// Main entry point for monolithic processing, with caching.
    pub async fn process_meeting_with_cache(
        &self,
        meeting: &Meeting,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let packet_url = meeting
            .packet_url
            .as_ref()
            .ok_or(ProcessingError::NoPacketUrl)?;
        let cache_key = packet_url.canonical_key();

        // Cache first
        let cached = {
            let db = self.lock_db()?;
            db.get_cached_summary(&cache_key)?
        };
        if let Some(entry) = cached {
            log::info!("[Cache] HIT - {}", meeting.banana);
            {
                let db = self.lock_db()?;
                db.record_cache_hit(&cache_key)?;
            }
            return Ok(ProcessOutcome {
                summary: entry.summary,
                processing_time: entry.processing_time.unwrap_or(0.0),
                cached: true,
                processing_method: "cached".to_string(),
            });
        }

        log::info!("[Cache] MISS - {}", meeting.banana);
        let start = Instant::now();

        let (summary, method, participation) = self.process_packet(packet_url).await?;
        let processing_time = start.elapsed().as_secs_f64();

        {
            let db = self.lock_db()?;
            db.update_meeting_summary(
                &meeting.id,
                &summary,
                &method,
                processing_time,
                None,
                participation.as_ref(),
            )?;

            // Cache write failures are non-fatal; the summary is already
            // stored on the meeting
            if let Err(e) = db.store_cached_summary(&cache_key, &summary, processing_time) {
                log::warn!("Failed to store in cache: {}", e);
            }
        }

        log::info!("[Processing] SUCCESS - {}", meeting.banana);

        Ok(ProcessOutcome {
            summary,
            processing_time,
            cached: false,
            processing_method: method,
        })
    }

    /// Tier-1 processing: extract text, judge quality, parse participation,
    /// summarize. Raises when the document needs a premium tier.
    async fn process_packet(
        &self,
        packet_url: &PacketUrl,
    ) -> Result<(String, String, Option<ParticipationInfo>), ProcessingError> {
        match packet_url {
            PacketUrl::Single(url) => {
                let text = self.extract_pdf_text(url).await.map_err(|e| {
                    log::error!("[Tier1] REJECTED - Requires premium tier - {}", url);
                    ProcessingError::RequiresPremiumTier(e.to_string())
                })?;

                // Participation parsed BEFORE the LLM step so search indexes
                // get contact info even when summarization fails
                let participation = parse_participation_info(&text);

                let summary = self
                    .summarizer
                    .summarize_meeting(&text)
                    .await
                    .map_err(|e| ProcessingError::Summarizer(e.to_string()))?;
                log::info!("[Tier1] SUCCESS - {}", url);

                Ok((summary, "tier1_pdf_text".to_string(), participation))
            }
            PacketUrl::Many(urls) => self.process_multiple_pdfs(urls).await,
        }
    }

    /// Multi-document packets: extract everything, label each document, and
    /// summarize once with full context.
    async fn process_multiple_pdfs(
        &self,
        urls: &[String],
    ) -> Result<(String, String, Option<ParticipationInfo>), ProcessingError> {
        log::info!("Processing {} PDFs with combined context", urls.len());

        let mut parts = Vec::new();
        let mut failed = 0usize;

        for (i, url) in urls.iter().enumerate() {
            log::info!("Extracting text from PDF {}/{}: {}", i + 1, urls.len(), url);
            match self.extract_pdf_text(url).await {
                Ok(text) => {
                    let label = if i == 0 {
                        "MAIN AGENDA".to_string()
                    } else {
                        format!("SUPPLEMENTAL MATERIAL {}", i)
                    };
                    parts.push(format!("=== {} ===\n{}", label, text));
                }
                Err(e) => {
                    log::warn!("No usable text from PDF {}: {}", i + 1, e);
                    failed += 1;
                }
            }
        }

        if parts.is_empty() {
            log::error!(
                "[Tier1] REJECTED - No usable text from any of {} PDFs",
                urls.len()
            );
            return Err(ProcessingError::RequiresPremiumTier(format!(
                "all {} documents failed extraction",
                urls.len()
            )));
        }

        let combined = parts.join("\n\n");
        drop(parts);
        log::info!(
            "[Tier1] Combined {}/{} documents ({} chars total)",
            urls.len() - failed,
            urls.len(),
            combined.len()
        );

        let participation = parse_participation_info(&combined);

        let mut summary = self
            .summarizer
            .summarize_meeting(&combined)
            .await
            .map_err(|e| ProcessingError::Summarizer(e.to_string()))?;
        drop(combined);

        if failed > 0 {
            summary.push_str(&format!(
                "\n\n[Note: {} of {} documents could not be processed]",
                failed,
                urls.len()
            ));
        }

        Ok((
            summary,
            format!("multiple_pdfs_{}_combined", urls.len()),
            participation,
        ))
    }

    /// Download and extract one PDF, enforcing the quality gate.
    async fn extract_pdf_text(&self, url: &str) -> Result<String, ProcessingError> {
        let bytes = self.http.download_pdf(url).await?;
        let extracted = pdf::extract_from_bytes(&bytes, false)?;
        pdf::is_good_extraction(&extracted.text)?;
        Ok(extracted.text)
    }

    // -----------------------------------------------------------------------
    // Item-level path
    // -----------------------------------------------------------------------

    /// Process a meeting at item granularity through the batch API. Items
    /// already summarized are reused; ceremonial items are stored but never
    /// submitted.
    pub async fn process_meeting_with_items(
        &self,
        meeting: &Meeting,
        items: &[AgendaItem],
    ) -> Result<ProcessOutcome, ProcessingError> {
        let start = Instant::now();

        struct ProcessedItem {
            title: String,
            summary: String,
            topics: Vec<String>,
        }

        let mut processed: Vec<ProcessedItem> = Vec::new();
        let mut need_processing: Vec<&AgendaItem> = Vec::new();
        let mut failed_titles: Vec<String> = Vec::new();

        for item in items {
            if item.attachments.is_empty() {
                log::debug!(
                    "[ItemProcessing] Skipping item without attachments: {}",
                    truncate(&item.title, 50)
                );
                continue;
            }
            if should_skip_processing(&item.title, item.matter_type.as_deref().unwrap_or("")) {
                log::debug!(
                    "[ItemProcessing] Ceremonial/administrative item stays unsummarized: {}",
                    truncate(&item.title, 50)
                );
                continue;
            }
            if let Some(summary) = &item.summary {
                processed.push(ProcessedItem {
                    title: item.title.clone(),
                    summary: summary.clone(),
                    topics: item.topics.clone().unwrap_or_default(),
                });
            } else {
                need_processing.push(item);
            }
        }

        if need_processing.is_empty() {
            log::info!(
                "[ItemProcessing] All {} items already processed",
                processed.len()
            );
        } else {
            log::info!(
                "[ItemProcessing] Extracting text from {} items for batch processing",
                need_processing.len()
            );

            // STEP 1: extract text per item
            let mut requests: Vec<ItemRequest> = Vec::new();
            let mut request_items: std::collections::HashMap<String, &AgendaItem> =
                std::collections::HashMap::new();

            for item in &need_processing {
                match self.extract_item_text(item).await {
                    Some(text) => {
                        log::debug!(
                            "[ItemProcessing] Prepared {} ({} chars)",
                            truncate(&item.title, 50),
                            text.len()
                        );
                        requests.push(ItemRequest {
                            item_id: item.id.clone(),
                            title: item.title.clone(),
                            text,
                            sequence: item.sequence,
                        });
                        request_items.insert(item.id.clone(), item);
                    }
                    None => {
                        log::warn!(
                            "[ItemProcessing] No text extracted for {}",
                            truncate(&item.title, 50)
                        );
                        failed_titles.push(item.title.clone());
                    }
                }
            }

            // STEP 2: one batch submission for everything (or sequential
            // single requests when batching is disabled)
            if !requests.is_empty() {
                let results = if self.batch_enabled {
                    log::info!(
                        "[ItemProcessing] Submitting batch with {} items",
                        requests.len()
                    );
                    self.summarizer.summarize_batch(&requests).await
                } else {
                    log::info!(
                        "[ItemProcessing] Batch disabled - processing {} items individually",
                        requests.len()
                    );
                    let mut results = Vec::with_capacity(requests.len());
                    for request in &requests {
                        let result = match self
                            .summarizer
                            .summarize_item(&request.title, &request.text)
                            .await
                        {
                            Ok((summary, topics)) => crate::summarizer::ItemResult {
                                item_id: request.item_id.clone(),
                                success: true,
                                summary: Some(summary),
                                topics,
                                error: None,
                            },
                            Err(e) => crate::summarizer::ItemResult {
                                item_id: request.item_id.clone(),
                                success: false,
                                summary: None,
                                topics: Vec::new(),
                                error: Some(e.to_string()),
                            },
                        };
                        results.push(result);
                    }
                    results
                };
                drop(requests);

                // STEP 3: store per-item results
                for result in results {
                    let Some(item) = request_items.get(&result.item_id) else {
                        log::warn!("[ItemProcessing] No item mapping for {}", result.item_id);
                        continue;
                    };

                    if result.success {
                        let summary = result.summary.unwrap_or_default();
                        let normalized = self.normalizer.normalize(&result.topics);
                        log::debug!(
                            "[TopicNormalization] {:?} -> {:?}",
                            result.topics,
                            normalized
                        );

                        {
                            let db = self.lock_db()?;
                            db.update_agenda_item_summary(&item.id, &summary, &normalized)?;

                            if let Some(matter_id) = &item.matter_id {
                                if let Err(e) = db.record_matter_appearance(
                                    matter_id,
                                    &meeting.banana,
                                    &item.title,
                                    item.matter_file.as_deref(),
                                    item.matter_type.as_deref(),
                                    &meeting.id,
                                    &item.id,
                                ) {
                                    log::warn!("Matter bookkeeping failed: {}", e);
                                } else if let Err(e) = db.set_matter_canonical_summary(
                                    matter_id, &summary, &normalized,
                                ) {
                                    log::warn!("Matter summary write failed: {}", e);
                                }
                            }
                        }

                        log::info!("[ItemProcessing] {}", truncate(&item.title, 60));
                        processed.push(ProcessedItem {
                            title: item.title.clone(),
                            summary,
                            topics: normalized,
                        });
                    } else {
                        log::warn!(
                            "[ItemProcessing] FAILED {}: {}",
                            truncate(&item.title, 60),
                            result.error.as_deref().unwrap_or("unknown")
                        );
                        failed_titles.push(item.title.clone());
                    }
                }
            }
        }

        if processed.is_empty() {
            log::warn!("[ItemProcessing] No items could be processed");
            return Err(ProcessingError::Summarizer(
                "no items could be processed".to_string(),
            ));
        }

        // Combine item summaries into the meeting summary
        let mut summary_parts = vec![format!("Meeting: {}\n", meeting.title)];
        for item in &processed {
            summary_parts.push(format!("\n{}\n{}", item.title, item.summary));
        }
        summary_parts.push(format!("\n\n[Processed {} items]", processed.len()));
        let combined_summary = summary_parts.join("\n");

        let topic_lists: Vec<Vec<String>> = processed.iter().map(|i| i.topics.clone()).collect();
        let meeting_topics = aggregate_topics(&topic_lists);
        log::info!(
            "[TopicAggregation] Aggregated {} unique topics from {} items: {:?}",
            meeting_topics.len(),
            processed.len(),
            meeting_topics
        );

        let processing_time = start.elapsed().as_secs_f64();
        let method = format!("item_level_{}_items", processed.len());

        {
            let db = self.lock_db()?;
            db.update_meeting_summary(
                &meeting.id,
                &combined_summary,
                &method,
                processing_time,
                Some(&meeting_topics),
                None,
            )?;
        }

        log::info!(
            "[ItemProcessing] Completed: {} items processed, {} failed in {:.1}s",
            processed.len(),
            failed_titles.len(),
            processing_time
        );

        Ok(ProcessOutcome {
            summary: combined_summary,
            processing_time,
            cached: false,
            processing_method: method,
        })
    }

    /// Concatenated text for an item's attachments: text segments as-is,
    /// PDFs fetched and extracted, low-value attachments excluded up front.
    async fn extract_item_text(&self, item: &AgendaItem) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();

        for att in &item.attachments {
            if is_low_value_attachment(&att.name) {
                log::debug!("[ItemProcessing] Skipping low-value attachment: {}", att.name);
                continue;
            }

            match att.kind {
                AttachmentKind::TextSegment => {
                    if let Some(content) = &att.content {
                        if !content.is_empty() {
                            parts.push(content.clone());
                        }
                    }
                }
                AttachmentKind::Pdf => {
                    let Some(url) = &att.url else {
                        log::warn!("[ItemProcessing] PDF attachment has no URL, skipping");
                        continue;
                    };
                    match self.extract_attachment_pdf(url).await {
                        Ok(text) => {
                            log::debug!(
                                "[ItemProcessing] Extracted {} chars from {}",
                                text.len(),
                                att.name
                            );
                            parts.push(format!("=== {} ===\n{}", att.name, text));
                        }
                        Err(e) => {
                            log::warn!(
                                "[ItemProcessing] Failed to extract from {}: {}",
                                att.name,
                                e
                            );
                        }
                    }
                }
                AttachmentKind::Doc | AttachmentKind::Unknown => {
                    log::debug!("[ItemProcessing] Skipping attachment type: {:?}", att.kind);
                }
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// PDF extraction without the meeting-level quality gate; attachment
    /// quality varies and partial text is still useful per item.
    async fn extract_attachment_pdf(&self, url: &str) -> Result<String, ProcessingError> {
        let bytes = self.http.download_pdf(url).await?;
        let extracted = pdf::extract_from_bytes(&bytes, false)?;
        Ok(extracted.text)
    }

    // -----------------------------------------------------------------------
    // Auto-detection path
    // -----------------------------------------------------------------------

    /// Dispatch for queued meetings: stored items → item-level; otherwise a
    /// large packet goes through structural chunking into detected items,
    /// and small or unstructured packets fall back to monolithic.
    pub async fn process_meeting_auto(
        &self,
        meeting: &Meeting,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let stored_items = {
            let db = self.lock_db()?;
            db.get_agenda_items(&meeting.id)?
        };

        if !stored_items.is_empty() {
            log::info!(
                "[ItemProcessing] Found {} items for {}",
                stored_items.len(),
                meeting.title
            );
            return self.process_meeting_with_items(meeting, &stored_items).await;
        }

        // No pre-supplied items; attempt detection on the packet
        let Some(packet_url) = &meeting.packet_url else {
            return Err(ProcessingError::NoPacketUrl);
        };

        log::info!("[ItemDetection] No items in DB, attempting to detect from PDF");

        let first_url = match packet_url {
            PacketUrl::Single(url) => url.clone(),
            PacketUrl::Many(urls) => match urls.first() {
                Some(url) => url.clone(),
                None => return Err(ProcessingError::NoPacketUrl),
            },
        };

        let text = match self.extract_pdf_text(&first_url).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "[ItemDetection] PDF extraction failed ({}), falling back to monolithic",
                    e
                );
                return self.process_meeting_with_cache(meeting).await;
            }
        };

        let page_count = pdf::estimate_page_count(&text);
        if page_count <= SMALL_PACKET_PAGES || text.len() < SMALL_PACKET_CHARS {
            log::info!(
                "[ItemDetection] Small packet ({} pages, {} chars) - processing monolithically",
                page_count,
                text.len()
            );
            return self.process_meeting_with_cache(meeting).await;
        }

        let mut detected = chunker::chunk_by_structure(&text);
        if detected.is_empty() {
            detected = chunker::chunk_by_patterns(&text);
        }
        drop(text);

        if detected.is_empty() {
            log::info!("[MonolithicProcessing] No item structure detected, processing as single unit");
            return self.process_meeting_with_cache(meeting).await;
        }

        let detected_items: Vec<AgendaItem> = detected
            .into_iter()
            .map(|chunk| AgendaItem {
                id: AgendaItem::compose_detected_id(&meeting.id, chunk.sequence),
                meeting_id: meeting.id.clone(),
                title: chunk.title,
                sequence: chunk.sequence,
                attachments: vec![Attachment::text_segment(
                    chunk.text.chars().take(TEXT_SEGMENT_CAP).collect::<String>(),
                    chunk.start_page,
                )],
                summary: None,
                topics: None,
                matter_id: None,
                matter_file: None,
                matter_type: None,
                sponsors: None,
                section: None,
                item_number: None,
            })
            .collect();

        let stored = {
            let db = self.lock_db()?;
            db.store_agenda_items(&detected_items)?
        };
        log::info!(
            "[ItemDetection] Stored {} detected items for {}",
            stored,
            meeting.title
        );

        self.process_meeting_with_items(meeting, &detected_items)
            .await
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::summarizer::PromptLibrary;
    use crate::types::ProcessingStatus;

    fn test_processor() -> AgendaProcessor {
        let db = Arc::new(Mutex::new(test_db()));
        let normalizer = TopicNormalizer::new();
        let summarizer = Summarizer::new(
            "test-key",
            PromptLibrary::embedded(),
            normalizer.prompt_examples(),
        )
        .expect("summarizer");
        AgendaProcessor::new(db, summarizer, TopicNormalizer::new(), true).expect("processor")
    }

    fn sample_meeting(id: &str, packet: &str) -> Meeting {
        Meeting {
            id: id.to_string(),
            banana: "paloaltoCA".to_string(),
            title: "City Council".to_string(),
            date: None,
            packet_url: Some(PacketUrl::Single(packet.to_string())),
            agenda_url: None,
            summary: None,
            topics: None,
            status: None,
            processing_status: ProcessingStatus::Pending,
            processing_method: None,
            processing_time: None,
            participation: None,
            location: None,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits() {
        let processor = test_processor();
        let meeting = sample_meeting("mtg-1", "https://example.com/packet.pdf");

        {
            let db = processor.db.lock().unwrap();
            db.upsert_meeting(&meeting).expect("upsert");
            db.store_cached_summary("https://example.com/packet.pdf", "Cached summary", 4.2)
                .expect("cache");
        }

        let outcome = processor
            .process_meeting_with_cache(&meeting)
            .await
            .expect("outcome");
        assert!(outcome.cached);
        assert_eq!(outcome.summary, "Cached summary");
        assert_eq!(outcome.processing_method, "cached");

        // Exactly one hit recorded
        let hit_count = {
            let db = processor.db.lock().unwrap();
            db.get_cached_summary("https://example.com/packet.pdf")
                .expect("query")
                .expect("entry")
                .hit_count
        };
        assert_eq!(hit_count, 1);
    }

    #[tokio::test]
    async fn test_list_packet_cache_key_is_order_independent() {
        let processor = test_processor();
        let mut meeting = sample_meeting("mtg-2", "unused");
        meeting.packet_url = Some(PacketUrl::Many(vec![
            "https://b.example.com/2.pdf".to_string(),
            "https://a.example.com/1.pdf".to_string(),
        ]));

        let key = PacketUrl::Many(vec![
            "https://a.example.com/1.pdf".to_string(),
            "https://b.example.com/2.pdf".to_string(),
        ])
        .canonical_key();

        {
            let db = processor.db.lock().unwrap();
            db.upsert_meeting(&meeting).expect("upsert");
            db.store_cached_summary(&key, "Combined summary", 1.0)
                .expect("cache");
        }

        let outcome = processor
            .process_meeting_with_cache(&meeting)
            .await
            .expect("outcome");
        assert!(outcome.cached);
        assert_eq!(outcome.summary, "Combined summary");
    }

    #[tokio::test]
    async fn test_missing_packet_url_rejected() {
        let processor = test_processor();
        let mut meeting = sample_meeting("mtg-3", "unused");
        meeting.packet_url = None;

        let err = processor
            .process_meeting_with_cache(&meeting)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::NoPacketUrl));
    }

    #[tokio::test]
    async fn test_item_text_from_segments_skips_low_value() {
        let processor = test_processor();
        let item = AgendaItem {
            id: "m_1".to_string(),
            meeting_id: "m".to_string(),
            title: "Budget adoption".to_string(),
            sequence: 1,
            attachments: vec![
                Attachment::text_segment("Budget details body", Some(2)),
                Attachment {
                    name: "Public Comment Letters".to_string(),
                    url: Some("https://example.com/comments.pdf".to_string()),
                    kind: AttachmentKind::Pdf,
                    content: None,
                    start_page: None,
                },
            ],
            summary: None,
            topics: None,
            matter_id: None,
            matter_file: None,
            matter_type: None,
            sponsors: None,
            section: None,
            item_number: None,
        };

        // The low-value PDF attachment is excluded before any fetch, so no
        // network happens here
        let text = processor.extract_item_text(&item).await.expect("text");
        assert_eq!(text, "Budget details body");
    }

    #[tokio::test]
    async fn test_item_without_usable_attachments_yields_none() {
        let processor = test_processor();
        let item = AgendaItem {
            id: "m_2".to_string(),
            meeting_id: "m".to_string(),
            title: "Item".to_string(),
            sequence: 1,
            attachments: vec![Attachment {
                name: "Slides".to_string(),
                url: Some("https://example.com/slides.pptx".to_string()),
                kind: AttachmentKind::Unknown,
                content: None,
                start_page: None,
            }],
            summary: None,
            topics: None,
            matter_id: None,
            matter_file: None,
            matter_type: None,
            sponsors: None,
            section: None,
            item_number: None,
        };

        assert!(processor.extract_item_text(&item).await.is_none());
    }
}
