//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use ristak_core::{
  identity::{IdentifierType, Metadata, NewIdentityLink},
  store::{IdentityStore, TrackingStore},
  tracking::{LinkOutcome, NewContact, NewSession},
};
use serde_json::json;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn meta(value: serde_json::Value) -> Metadata {
  match value {
    serde_json::Value::Object(map) => map,
    other => panic!("not an object: {other}"),
  }
}

fn email_link(primary: &str, address: &str, linked_by: &str) -> NewIdentityLink {
  NewIdentityLink::new(primary, IdentifierType::Email, address, linked_by)
}

// ─── Identity graph ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_then_lookup() {
  let s = store().await;

  let link = s
    .upsert_identifier(email_link("identity_1_aaaaaaa", "a@x.com", "job"))
    .await
    .unwrap();
  assert_eq!(link.primary_identity_id, "identity_1_aaaaaaa");
  assert_eq!(link.identifier_type, IdentifierType::Email);
  assert_eq!(link.confidence_score, 1.0);

  let found = s
    .find_primary_identity(&IdentifierType::Email, "a@x.com")
    .await
    .unwrap();
  assert_eq!(found.as_deref(), Some("identity_1_aaaaaaa"));

  let missing = s
    .find_primary_identity(&IdentifierType::Phone, "a@x.com")
    .await
    .unwrap();
  assert!(missing.is_none());
}

#[tokio::test]
async fn relinking_merges_metadata_and_keeps_max_confidence() {
  let s = store().await;

  s.upsert_identifier(
    email_link("identity_1_aaaaaaa", "a@x.com", "job")
      .with_confidence(0.5)
      .with_metadata(meta(json!({ "x": 1, "shared": "old" }))),
  )
  .await
  .unwrap();

  let second = s
    .upsert_identifier(
      email_link("identity_1_aaaaaaa", "a@x.com", "job2")
        .with_confidence(0.9)
        .with_metadata(meta(json!({ "y": 2, "shared": "new" }))),
    )
    .await
    .unwrap();

  assert_eq!(second.confidence_score, 0.9);
  assert_eq!(second.linked_by.as_deref(), Some("job2"));
  assert_eq!(
    serde_json::Value::Object(second.metadata),
    json!({ "x": 1, "y": 2, "shared": "old" })
  );

  // A lower score never wins.
  let third = s
    .upsert_identifier(email_link("identity_1_aaaaaaa", "a@x.com", "job3").with_confidence(0.2))
    .await
    .unwrap();
  assert_eq!(third.confidence_score, 0.9);

  let rows = s.list_identifiers("identity_1_aaaaaaa", None).await.unwrap();
  assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn relinking_keeps_null_keys_and_does_not_deep_merge() {
  let s = store().await;

  s.upsert_identifier(
    email_link("identity_1_aaaaaaa", "a@x.com", "job")
      .with_metadata(meta(json!({ "x": null, "n": { "b": 1 } }))),
  )
  .await
  .unwrap();

  let relinked = s
    .upsert_identifier(
      email_link("identity_1_aaaaaaa", "a@x.com", "job")
        .with_metadata(meta(json!({ "x": "set", "y": 2, "n": { "c": 3 } }))),
    )
    .await
    .unwrap();

  let expected = json!({ "x": null, "n": { "b": 1 }, "y": 2 });
  assert_eq!(serde_json::Value::Object(relinked.metadata), expected);

  let rows = s.list_identifiers("identity_1_aaaaaaa", None).await.unwrap();
  assert_eq!(serde_json::Value::Object(rows[0].metadata.clone()), expected);
}

#[tokio::test]
async fn relinking_reparents_identifier() {
  let s = store().await;

  s.upsert_identifier(email_link("identity_1_aaaaaaa", "a@x.com", "job"))
    .await
    .unwrap();
  s.upsert_identifier(email_link("identity_2_bbbbbbb", "a@x.com", "job"))
    .await
    .unwrap();

  let owner = s
    .find_primary_identity(&IdentifierType::Email, "a@x.com")
    .await
    .unwrap();
  assert_eq!(owner.as_deref(), Some("identity_2_bbbbbbb"));
  assert!(!s.primary_identity_exists("identity_1_aaaaaaa").await.unwrap());
  assert!(s.primary_identity_exists("identity_2_bbbbbbb").await.unwrap());
}

#[tokio::test]
async fn insert_if_absent_never_overwrites() {
  let s = store().await;

  let first = NewIdentityLink::new("identity_1_aaaaaaa", IdentifierType::VisitorId, "v1", "first_visit");
  let second = NewIdentityLink::new("identity_2_bbbbbbb", IdentifierType::VisitorId, "v1", "first_visit");

  assert!(s.insert_identifier_if_absent(first).await.unwrap());
  assert!(!s.insert_identifier_if_absent(second).await.unwrap());

  let owner = s
    .find_primary_identity(&IdentifierType::VisitorId, "v1")
    .await
    .unwrap();
  assert_eq!(owner.as_deref(), Some("identity_1_aaaaaaa"));
}

#[tokio::test]
async fn list_identifiers_is_oldest_first_and_filterable() {
  let s = store().await;
  let id = "identity_1_aaaaaaa";

  for (kind, value) in [
    (IdentifierType::VisitorId, "v1"),
    (IdentifierType::Email, "a@x.com"),
    (IdentifierType::VisitorId, "v2"),
  ] {
    s.upsert_identifier(NewIdentityLink::new(id, kind, value, "job"))
      .await
      .unwrap();
  }

  let all = s.list_identifiers(id, None).await.unwrap();
  let values: Vec<_> = all.iter().map(|l| l.identifier_value.as_str()).collect();
  assert_eq!(values, ["v1", "a@x.com", "v2"]);

  let visitors = s
    .list_identifiers(id, Some(&IdentifierType::VisitorId))
    .await
    .unwrap();
  let values: Vec<_> = visitors.iter().map(|l| l.identifier_value.as_str()).collect();
  assert_eq!(values, ["v1", "v2"]);
}

#[tokio::test]
async fn reassign_moves_every_row_and_stamps_merged_from() {
  let s = store().await;
  let a = "identity_1_aaaaaaa";
  let b = "identity_2_bbbbbbb";

  for value in ["a1", "a2", "a3"] {
    s.upsert_identifier(NewIdentityLink::new(a, IdentifierType::VisitorId, value, "job"))
      .await
      .unwrap();
  }
  for value in ["b1", "b2"] {
    s.upsert_identifier(
      NewIdentityLink::new(b, IdentifierType::VisitorId, value, "job")
        .with_metadata(meta(json!({ "device_fingerprint": "fp" }))),
    )
    .await
    .unwrap();
  }

  let moved = s.reassign_primary_identity(a, b).await.unwrap();
  assert_eq!(moved, 2);

  let rows = s.list_identifiers(a, None).await.unwrap();
  assert_eq!(rows.len(), 5);
  assert!(s.list_identifiers(b, None).await.unwrap().is_empty());

  for row in rows.iter().filter(|r| r.identifier_value.starts_with('b')) {
    assert_eq!(row.metadata.get("merged_from"), Some(&json!(b)));
    assert_eq!(row.metadata.get("device_fingerprint"), Some(&json!("fp")));
  }
  for row in rows.iter().filter(|r| r.identifier_value.starts_with('a')) {
    assert!(row.metadata.get("merged_from").is_none());
  }
}

#[tokio::test]
async fn fingerprint_search_excludes_and_caps() {
  let s = store().await;

  for i in 0..7 {
    s.upsert_identifier(
      NewIdentityLink::new(
        format!("identity_{i}_aaaaaaa"),
        IdentifierType::VisitorId,
        format!("v{i}"),
        "first_visit",
      )
      .with_metadata(meta(json!({ "device_fingerprint": "fp-1" }))),
    )
    .await
    .unwrap();
  }
  // Same fingerprint on a non-visitor row is ignored.
  s.upsert_identifier(
    NewIdentityLink::new("identity_9_aaaaaaa", IdentifierType::Email, "a@x.com", "job")
      .with_metadata(meta(json!({ "device_fingerprint": "fp-1" }))),
  )
  .await
  .unwrap();

  let found = s.find_by_fingerprint("fp-1", None, 5).await.unwrap();
  assert_eq!(found.len(), 5);
  assert_eq!(found[0].visitor_id, "v0");

  let excluding = s
    .find_by_fingerprint("fp-1", Some("identity_0_aaaaaaa"), 5)
    .await
    .unwrap();
  assert_eq!(excluding[0].visitor_id, "v1");
  assert!(excluding.iter().all(|m| m.primary_identity_id != "identity_0_aaaaaaa"));

  assert!(s.find_by_fingerprint("fp-2", None, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_count_each_identifier_type() {
  let s = store().await;
  let id = "identity_1_aaaaaaa";

  for (kind, value) in [
    (IdentifierType::VisitorId, "v1"),
    (IdentifierType::VisitorId, "v2"),
    (IdentifierType::Email, "a@x.com"),
    (IdentifierType::Phone, "+15550100"),
    (IdentifierType::ContactId, "c1"),
  ] {
    s.upsert_identifier(NewIdentityLink::new(id, kind, value, "job"))
      .await
      .unwrap();
  }

  let stats = s.identity_stats(id).await.unwrap();
  assert_eq!(stats.total_identifiers, 5);
  assert_eq!(stats.visitor_ids_count, 2);
  assert_eq!(stats.emails_count, 1);
  assert_eq!(stats.phones_count, 1);
  assert_eq!(stats.contacts_count, 1);
  assert!(stats.first_seen.unwrap() <= stats.last_seen.unwrap());

  let empty = s.identity_stats("identity_0_none").await.unwrap();
  assert_eq!(empty.total_identifiers, 0);
  assert!(empty.first_seen.is_none());
}

// ─── Tracking ────────────────────────────────────────────────────────────────

fn contact(id: &str, email: Option<&str>, minutes_ago: i64) -> NewContact {
  NewContact {
    contact_id: id.into(),
    email:      email.map(Into::into),
    created_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
    ..NewContact::default()
  }
}

fn session(visitor: &str, email: Option<&str>, minutes_ago: i64) -> NewSession {
  NewSession {
    email: email.map(Into::into),
    created_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
    ..NewSession::new(visitor)
  }
}

#[tokio::test]
async fn orphan_contacts_are_recent_reachable_and_unlinked() {
  let s = store().await;
  let cutoff = Utc::now() - Duration::hours(2);

  s.record_contact(contact("fresh", Some("a@x.com"), 10)).await.unwrap();
  s.record_contact(contact("newest", Some("b@x.com"), 1)).await.unwrap();
  s.record_contact(contact("stale", Some("c@x.com"), 180)).await.unwrap();
  s.record_contact(contact("unreachable", None, 5)).await.unwrap();
  s.record_contact(contact("linked", Some("d@x.com"), 5)).await.unwrap();
  s.record_session(NewSession {
    contact_id: Some("linked".into()),
    ..session("v-linked", None, 5)
  })
  .await
  .unwrap();

  let orphans = s.find_orphan_contacts(cutoff, 50).await.unwrap();
  let ids: Vec<_> = orphans.iter().map(|c| c.contact_id.as_str()).collect();
  assert_eq!(ids, ["newest", "fresh"]);

  let capped = s.find_orphan_contacts(cutoff, 1).await.unwrap();
  assert_eq!(capped.len(), 1);
  assert_eq!(capped[0].contact_id, "newest");
}

#[tokio::test]
async fn contact_lookup_by_email_or_phone() {
  let s = store().await;
  s.record_contact(NewContact {
    phone: Some("+15550100".into()),
    ..contact("c1", Some("a@x.com"), 10)
  })
  .await
  .unwrap();

  let by_email = s
    .find_contact_by_email_or_phone(Some("a@x.com"), None)
    .await
    .unwrap();
  assert_eq!(by_email.unwrap().contact_id, "c1");

  let by_phone = s
    .find_contact_by_email_or_phone(Some("nobody@x.com"), Some("+15550100"))
    .await
    .unwrap();
  assert_eq!(by_phone.unwrap().contact_id, "c1");

  assert!(s.find_contact_by_email_or_phone(None, None).await.unwrap().is_none());
}

#[tokio::test]
async fn recording_a_contact_seeds_and_keeps_attribution_and_visitor() {
  let s = store().await;
  let seeded = s
    .record_contact(NewContact {
      rstk_adid: Some("ad-1".into()),
      rstk_source: Some("newsletter".into()),
      visitor_id: Some("v-old".into()),
      ..contact("c1", Some("a@x.com"), 10)
    })
    .await
    .unwrap();
  assert_eq!(seeded.rstk_source.as_deref(), Some("newsletter"));
  assert_eq!(seeded.visitor_id.as_deref(), Some("v-old"));

  // A re-record refreshes contact details but never replaces these.
  let again = s
    .record_contact(NewContact {
      phone: Some("+15550100".into()),
      rstk_adid: Some("ad-2".into()),
      rstk_source: Some("google".into()),
      visitor_id: Some("v-new".into()),
      ..contact("c1", None, 10)
    })
    .await
    .unwrap();
  assert_eq!(again.email.as_deref(), Some("a@x.com"));
  assert_eq!(again.phone.as_deref(), Some("+15550100"));
  assert_eq!(again.rstk_adid.as_deref(), Some("ad-1"));
  assert_eq!(again.rstk_source.as_deref(), Some("newsletter"));
  assert_eq!(again.visitor_id.as_deref(), Some("v-old"));
}

#[tokio::test]
async fn unlinked_visitors_group_by_visitor_within_window() {
  let s = store().await;
  let c = s.record_contact(contact("c1", Some("a@x.com"), 10)).await.unwrap();

  s.record_session(session("v2", Some("a@x.com"), 30)).await.unwrap();
  s.record_session(session("v1", Some("a@x.com"), 60)).await.unwrap();
  s.record_session(session("v1", Some("a@x.com"), 20)).await.unwrap();
  // Too old, other person, already linked.
  s.record_session(session("v3", Some("a@x.com"), 60 * 24 * 10)).await.unwrap();
  s.record_session(session("v4", Some("b@x.com"), 5)).await.unwrap();
  s.record_session(NewSession {
    contact_id: Some("other".into()),
    ..session("v5", Some("a@x.com"), 5)
  })
  .await
  .unwrap();

  let window = Utc::now() - Duration::days(7);
  let matches = s.find_unlinked_visitors(&c, window).await.unwrap();
  let ids: Vec<_> = matches.iter().map(|m| m.visitor_id.as_str()).collect();
  assert_eq!(ids, ["v1", "v2"]);
  assert_eq!(matches[0].session_count, 2);
  assert!(matches[0].first_seen < matches[0].last_seen);
  assert_eq!(matches[1].session_count, 1);
}

#[tokio::test]
async fn unlinked_visitors_match_known_visitor_id() {
  let s = store().await;
  let mut c = s.record_contact(contact("c1", None, 10)).await.unwrap();
  c.visitor_id = Some("v9".into());

  s.record_session(session("v9", None, 5)).await.unwrap();

  let window = Utc::now() - Duration::days(7);
  let matches = s.find_unlinked_visitors(&c, window).await.unwrap();
  assert_eq!(matches.len(), 1);
  assert_eq!(matches[0].visitor_id, "v9");

  c.visitor_id = None;
  assert!(s.find_unlinked_visitors(&c, window).await.unwrap().is_empty());
}

#[tokio::test]
async fn link_visitors_sets_contact_and_backfills_attribution() {
  let s = store().await;
  s.record_contact(contact("c1", Some("a@x.com"), 10)).await.unwrap();

  s.record_session(session("v1", Some("a@x.com"), 40)).await.unwrap();
  s.record_session(NewSession {
    utm_source: Some("facebook".into()),
    fbclid: Some("fb.1".into()),
    campaign_id: Some("camp-1".into()),
    ..session("v1", None, 30)
  })
  .await
  .unwrap();
  s.record_session(NewSession {
    utm_source: Some("google".into()),
    ad_id: Some("ad-later".into()),
    ..session("v2", None, 20)
  })
  .await
  .unwrap();

  let outcome = s
    .link_visitors("c1", &["v1".to_string(), "v2".to_string()])
    .await
    .unwrap();
  assert_eq!(outcome.sessions_linked, 3);

  let attribution = outcome.attribution.unwrap();
  assert_eq!(attribution.rstk_adid.as_deref(), Some("fb.1"));
  assert_eq!(attribution.rstk_source.as_deref(), Some("facebook"));

  let stored = s.get_contact("c1").await.unwrap().unwrap();
  assert_eq!(stored.rstk_adid.as_deref(), Some("fb.1"));
  assert_eq!(stored.rstk_source.as_deref(), Some("facebook"));
  assert_eq!(stored.visitor_id.as_deref(), Some("v1"));

  for v in ["v1", "v2"] {
    let sessions = s.list_sessions(v).await.unwrap();
    assert!(sessions.iter().all(|x| x.contact_id.as_deref() == Some("c1")));
  }

  // Second call links nothing new and changes nothing.
  let again = s.link_visitors("c1", &["v1".to_string()]).await.unwrap();
  assert_eq!(again.sessions_linked, 0);
  assert!(again.attribution.is_none());
}

#[tokio::test]
async fn link_visitors_that_links_nothing_leaves_contact_untouched() {
  let s = store().await;
  s.record_contact(contact("c1", Some("vip@x.com"), 10)).await.unwrap();
  s.record_session(NewSession {
    contact_id: Some("other".into()),
    utm_source: Some("google".into()),
    ..session("v-vip", Some("vip@x.com"), 5)
  })
  .await
  .unwrap();

  let outcome = s.link_visitors("c1", &["v-vip".to_string()]).await.unwrap();
  assert_eq!(outcome, LinkOutcome::default());

  let stored = s.get_contact("c1").await.unwrap().unwrap();
  assert_eq!(stored.visitor_id, None);
  assert_eq!(stored.rstk_source, None);
}

#[tokio::test]
async fn link_visitors_records_the_first_visitor_that_linked() {
  let s = store().await;
  s.record_contact(contact("c1", Some("a@x.com"), 10)).await.unwrap();
  s.record_session(NewSession {
    contact_id: Some("other".into()),
    ..session("v-taken", None, 30)
  })
  .await
  .unwrap();
  s.record_session(session("v-free", None, 20)).await.unwrap();

  let outcome = s
    .link_visitors("c1", &["v-taken".to_string(), "v-free".to_string()])
    .await
    .unwrap();
  assert_eq!(outcome.sessions_linked, 1);

  let stored = s.get_contact("c1").await.unwrap().unwrap();
  assert_eq!(stored.visitor_id.as_deref(), Some("v-free"));
}

#[tokio::test]
async fn link_visitors_never_clobbers() {
  let s = store().await;
  s.record_contact(NewContact {
    rstk_adid: Some("existing-ad".into()),
    ..contact("c1", Some("a@x.com"), 10)
  })
  .await
  .unwrap();

  s.record_session(NewSession {
    contact_id: Some("someone-else".into()),
    ..session("v1", None, 30)
  })
  .await
  .unwrap();
  s.record_session(NewSession {
    utm_source: Some("tiktok".into()),
    ad_id: Some("ad-new".into()),
    ..session("v1", None, 20)
  })
  .await
  .unwrap();

  let outcome = s.link_visitors("c1", &["v1".to_string()]).await.unwrap();
  assert_eq!(outcome.sessions_linked, 1);

  let sessions = s.list_sessions("v1").await.unwrap();
  assert_eq!(sessions[0].contact_id.as_deref(), Some("someone-else"));
  assert_eq!(sessions[1].contact_id.as_deref(), Some("c1"));

  let stored = s.get_contact("c1").await.unwrap().unwrap();
  assert_eq!(stored.rstk_adid.as_deref(), Some("existing-ad"));
  assert_eq!(stored.rstk_source.as_deref(), Some("tiktok"));
}

#[tokio::test]
async fn link_visitors_without_signal_only_sets_visitor_id() {
  let s = store().await;
  s.record_contact(contact("c1", Some("a@x.com"), 10)).await.unwrap();
  s.record_session(NewSession {
    campaign_id: Some("camp-only".into()),
    ..session("v1", Some("a@x.com"), 5)
  })
  .await
  .unwrap();

  let outcome = s.link_visitors("c1", &["v1".to_string()]).await.unwrap();
  assert_eq!(outcome.sessions_linked, 1);
  assert!(outcome.attribution.is_none());

  let stored = s.get_contact("c1").await.unwrap().unwrap();
  assert_eq!(stored.visitor_id.as_deref(), Some("v1"));
  assert!(stored.rstk_adid.is_none());
}
