//! Customer Profile Merger.
//!
//! Folds a purchase (or a lead) into the remote profile for its email.
//! Tags only grow, consent only moves toward subscribed, and the note is an
//! append-only purchase ledger. The whole read-merge-write runs under the
//! email's lock so concurrent purchases for one buyer cannot lose updates.

use chrono::Utc;
use relay_cache::EmailLocks;
use relay_core::types::{
    format_amount, split_name, CustomerProfile, LeadCapture, MarketingConsent, PurchaseCategory,
    PurchaseEvent, CUSTOMER_TAG, FIRST_TIME_TAG, LEAD_TAG, RETURNING_TAG,
};
use relay_core::RelayResult;
use relay_integrations::ProfileStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NOTE_HEADER: &str = "Purchase History:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Created(CustomerProfile),
    Updated(CustomerProfile),
    /// The profile already reflected this charge; nothing was written.
    Unchanged,
}

/// One note line per charge. The trailing `ref:` marker identifies the charge.
pub fn purchase_line(event: &PurchaseEvent, category_tag: &str) -> String {
    format!(
        "- {} | {} | {} | {} | ref:{}",
        event.occurred_at.format("%Y-%m-%d %H:%M UTC"),
        event.product_name,
        format_amount(event.amount_minor_units, &event.currency),
        category_tag,
        event.external_charge_id,
    )
}

pub fn note_mentions_charge(note: &str, charge_id: &str) -> bool {
    let marker = format!("ref:{charge_id}");
    note.lines().any(|line| line.trim_end().ends_with(&marker))
}

/// Insert `line` directly under the history header, creating the section
/// at the end of the note when it is missing. Bytes of the existing note,
/// line endings included, are carried over untouched.
pub fn insert_purchase_line(note: &str, line: &str) -> String {
    let mut offset = 0;
    for segment in note.split_inclusive('\n') {
        offset += segment.len();
        if segment.trim() != NOTE_HEADER {
            continue;
        }
        let eol = if segment.ends_with("\r\n") { "\r\n" } else { "\n" };
        let mut updated = String::with_capacity(note.len() + line.len() + eol.len());
        updated.push_str(&note[..offset]);
        if segment.ends_with('\n') {
            updated.push_str(line);
            updated.push_str(eol);
        } else {
            updated.push_str(eol);
            updated.push_str(line);
        }
        updated.push_str(&note[offset..]);
        return updated;
    }

    if note.trim().is_empty() {
        format!("{NOTE_HEADER}\n{line}")
    } else if note.ends_with('\n') {
        format!("{note}\n{NOTE_HEADER}\n{line}")
    } else {
        format!("{note}\n\n{NOTE_HEADER}\n{line}")
    }
}

/// Tags after applying a purchase to an existing profile: a pure union.
pub fn merged_tags(existing: &BTreeSet<String>, category_tag: &str, returning: bool) -> BTreeSet<String> {
    let mut tags = existing.clone();
    tags.insert(CUSTOMER_TAG.to_string());
    tags.insert(category_tag.to_string());
    if returning {
        tags.insert(RETURNING_TAG.to_string());
    }
    tags
}

pub struct ProfileMerger {
    store: Arc<dyn ProfileStore>,
    locks: Arc<EmailLocks>,
    main_purchase_tag: String,
}

impl ProfileMerger {
    pub fn new(store: Arc<dyn ProfileStore>, locks: Arc<EmailLocks>, main_purchase_tag: impl Into<String>) -> Self {
        Self {
            store,
            locks,
            main_purchase_tag: main_purchase_tag.into(),
        }
    }

    /// Profile tag for a purchase category; main purchases use the configured tag.
    pub fn category_tag<'a>(&'a self, category: &'a PurchaseCategory) -> &'a str {
        match category {
            PurchaseCategory::MainPurchase => &self.main_purchase_tag,
            PurchaseCategory::Upsell(slug) => slug,
        }
    }

    pub async fn merge_purchase(&self, event: &PurchaseEvent) -> RelayResult<MergeOutcome> {
        let _guard = self.locks.lock(&event.email).await;
        let category_tag = self.category_tag(&event.purchase_category).to_string();

        let Some(existing) = self.find(&event.email).await? else {
            let mut profile = CustomerProfile {
                email: event.email.clone(),
                phone: event.phone.clone(),
                tags: [CUSTOMER_TAG, category_tag.as_str(), FIRST_TIME_TAG]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                note: insert_purchase_line("", &purchase_line(event, &category_tag)),
                email_consent: MarketingConsent::Subscribed,
                sms_consent: sms_consent(event.phone.as_deref()),
                ..Default::default()
            };
            fill_name(&mut profile, event.customer_name.as_deref());

            let created = self.store.create(&profile).await?;
            info!(email = %event.email, charge_id = %event.external_charge_id, "Customer profile created");
            return Ok(MergeOutcome::Created(created));
        };

        let mut profile = existing.clone();
        profile.tags = merged_tags(&existing.tags, &category_tag, event.is_returning_customer);
        if !note_mentions_charge(&existing.note, &event.external_charge_id) {
            profile.note = insert_purchase_line(&existing.note, &purchase_line(event, &category_tag));
        }
        if profile.phone.is_none() {
            profile.phone = event.phone.clone();
        }
        fill_name(&mut profile, event.customer_name.as_deref());
        profile.email_consent = profile.email_consent.merge(MarketingConsent::Subscribed);
        profile.sms_consent = profile.sms_consent.merge(sms_consent(profile.phone.as_deref()));

        if profile == existing {
            debug!(email = %event.email, charge_id = %event.external_charge_id, "Profile already reflects charge");
            return Ok(MergeOutcome::Unchanged);
        }

        let updated = self.store.update(&profile).await?;
        info!(email = %event.email, charge_id = %event.external_charge_id, "Customer profile updated");
        Ok(MergeOutcome::Updated(updated))
    }

    /// Create or enrich a lead-only profile: tags `{lead, category}`, consent subscribed.
    pub async fn upsert_lead(&self, lead: &LeadCapture) -> RelayResult<MergeOutcome> {
        let _guard = self.locks.lock(&lead.email).await;
        let lead_tags = [LEAD_TAG, lead.category_tag.as_str()];

        let Some(existing) = self.find(&lead.email).await? else {
            let mut profile = CustomerProfile {
                email: lead.email.clone(),
                phone: lead.phone.clone(),
                tags: lead_tags.into_iter().map(String::from).collect(),
                note: format!(
                    "Lead captured {} via {}",
                    Utc::now().format("%Y-%m-%d"),
                    lead.form_name.as_deref().unwrap_or("lead form")
                ),
                email_consent: MarketingConsent::Subscribed,
                sms_consent: sms_consent(lead.phone.as_deref()),
                ..Default::default()
            };
            fill_name(&mut profile, Some(&lead.name));
            let created = self.store.create(&profile).await?;
            info!(email = %lead.email, "Lead profile created");
            return Ok(MergeOutcome::Created(created));
        };

        let mut profile = existing.clone();
        profile.tags.extend(lead_tags.into_iter().map(String::from));
        if profile.phone.is_none() {
            profile.phone = lead.phone.clone();
        }
        fill_name(&mut profile, Some(&lead.name));
        profile.email_consent = profile.email_consent.merge(MarketingConsent::Subscribed);
        profile.sms_consent = profile.sms_consent.merge(sms_consent(profile.phone.as_deref()));

        if profile == existing {
            return Ok(MergeOutcome::Unchanged);
        }
        let updated = self.store.update(&profile).await?;
        info!(email = %lead.email, "Lead profile updated");
        Ok(MergeOutcome::Updated(updated))
    }

    async fn find(&self, email: &str) -> RelayResult<Option<CustomerProfile>> {
        let mut matches = self.store.find_by_email(email).await?;
        if matches.len() > 1 {
            warn!(email, matches = matches.len(), "Multiple profiles share one email, using the first");
        }
        Ok((!matches.is_empty()).then(|| matches.swap_remove(0)))
    }
}

fn sms_consent(phone: Option<&str>) -> MarketingConsent {
    match phone {
        Some(_) => MarketingConsent::Subscribed,
        None => MarketingConsent::NotSubscribed,
    }
}

fn fill_name(profile: &mut CustomerProfile, name: Option<&str>) {
    let Some(name) = name else { return };
    let (first, last) = split_name(name);
    if profile.first_name.is_none() {
        profile.first_name = first;
    }
    if profile.last_name.is_none() {
        profile.last_name = last;
    }
}
