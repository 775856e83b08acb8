use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use placecard_core::models::{
    Category, CompanyRecord, MapLink, Operator, OperatorId, Permissions, PhoneNumber, RecordId,
    RecordVersion,
};
use placecard_core::photo::content_hash;
use placecard_core::retry::RetryPolicy;
use placecard_core::session::{ManualClock, SessionError, SessionManager, SessionState};
use placecard_core::store::{MemoryFileStore, MemoryRecordStore};
use placecard_core::transport::{Attachment, Command, OperatorEvent, Payload, RecordingOutbound};
use placecard_core::EngineConfig;
use pretty_assertions::assert_eq;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
const WATCHER: OperatorId = OperatorId::new(99);

struct Harness {
    records: Arc<MemoryRecordStore>,
    files: Arc<MemoryFileStore>,
    outbound: Arc<RecordingOutbound>,
    clock: Arc<ManualClock>,
    manager: SessionManager,
}

fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn id(raw: &str) -> RecordId {
    RecordId::new(raw).unwrap()
}

fn harness() -> Harness {
    let records = Arc::new(MemoryRecordStore::with_records([
        CompanyRecord::new(id("№310"), "Casa Verde").unwrap(),
        CompanyRecord::new(id("№311"), "Soda La Esquina").unwrap(),
    ]));
    let files = Arc::new(MemoryFileStore::new());
    let outbound = Arc::new(RecordingOutbound::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let config = EngineConfig {
        sync_retry: RetryPolicy::no_retry(),
        upload_retry: RetryPolicy::no_retry(),
        watchers: vec![WATCHER],
        ..EngineConfig::default()
    };
    let manager = SessionManager::new(records.clone(), files.clone(), outbound.clone(), &config)
        .with_clock(clock.clone());
    Harness {
        records,
        files,
        outbound,
        clock,
        manager,
    }
}

fn admin(raw: i64) -> Operator {
    Operator::new(OperatorId::new(raw), format!("op{raw}"), Permissions::All)
}

impl Harness {
    async fn send(&self, operator: &Operator, payload: Payload) -> Result<(), SessionError> {
        self.manager
            .on_operator_event(OperatorEvent::new(operator.clone(), payload))
            .await
    }

    async fn send_to(
        &self,
        operator: &Operator,
        record: &str,
        payload: Payload,
    ) -> Result<(), SessionError> {
        self.manager
            .on_operator_event(OperatorEvent::new(operator.clone(), payload).for_record(id(record)))
            .await
    }

    async fn edit(&self, operator: &Operator, record: &str) {
        self.send(operator, Payload::Command(Command::Edit(id(record))))
            .await
            .unwrap();
    }

    async fn text(&self, operator: &Operator, text: &str) -> Result<(), SessionError> {
        self.send(operator, Payload::Text(text.to_string())).await
    }

    async fn set_field(&self, operator: &Operator, field: &str, value: &str) {
        self.text(operator, field).await.unwrap();
        self.text(operator, value).await.unwrap();
    }

    async fn confirm(&self, operator: &Operator) -> Result<(), SessionError> {
        self.send(operator, Payload::Command(Command::Confirm)).await
    }

    fn last_text(&self, operator: &Operator) -> String {
        self.outbound
            .last_for(operator.id)
            .map(|message| message.text)
            .unwrap_or_default()
    }

    fn stored(&self, record: &str) -> (CompanyRecord, RecordVersion) {
        let snapshot = self.records.get(&id(record)).unwrap();
        (snapshot.record, snapshot.version)
    }
}

#[tokio::test]
async fn edit_confirm_writes_record_and_notifies_watchers() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "phone", "8888-7777").await;
    h.confirm(&ana).await.unwrap();

    let (record, version) = h.stored("№310");
    assert_eq!(version, RecordVersion::new(2));
    assert_eq!(record.phone.unwrap().as_str(), "+50688887777");
    assert!(h.last_text(&ana).starts_with("Saved №310"));
    assert_eq!(h.manager.session_count(), 0);

    let summary = h.outbound.last_for(WATCHER).unwrap().text;
    assert!(summary.contains("From: op1 (1)"));
    assert!(summary.contains("1. Phone numbers: - -> +50688887777"));

    let error = h.text(&ana, "name").await.unwrap_err();
    assert_eq!(error, SessionError::SessionNotFound);
}

#[tokio::test]
async fn validation_failure_keeps_session_at_field() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.text(&ana, "hours").await.unwrap();
    h.text(&ana, "Mon 09:00-13:00, 12:00-18:00").await.unwrap();
    assert!(h.last_text(&ana).starts_with("overlapping_hours"));

    h.text(&ana, "Mon-Fri 09:00-18:00; Sat 10:00-14:00").await.unwrap();
    h.confirm(&ana).await.unwrap();

    let (record, _) = h.stored("№310");
    assert_eq!(
        record.hours.unwrap().to_string(),
        "Mon-Fri 09:00-18:00; Sat 10:00-14:00; Sun closed"
    );
}

#[tokio::test]
async fn disjoint_concurrent_edits_both_commit() {
    let h = harness();
    let ana = admin(1);
    let ben = admin(2);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "phone", "+1 555 0100 22").await;

    h.edit(&ben, "№310").await;
    h.set_field(&ben, "type", "Adventures").await;
    h.confirm(&ben).await.unwrap();
    assert_eq!(h.stored("№310").1, RecordVersion::new(2));

    h.confirm(&ana).await.unwrap();

    let (record, version) = h.stored("№310");
    assert_eq!(version, RecordVersion::new(3));
    assert_eq!(record.category, Some(Category::Adventures));
    assert_eq!(record.phone.unwrap().as_str(), "+1555010022");
}

#[tokio::test]
async fn overlapping_edits_conflict_and_keep_first_value() {
    let h = harness();
    let ana = admin(1);
    let ben = admin(2);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "map", "https://maps.app.goo.gl/ana").await;
    h.edit(&ben, "№310").await;
    h.set_field(&ben, "map", "https://maps.app.goo.gl/ben").await;

    h.confirm(&ben).await.unwrap();
    h.confirm(&ana).await.unwrap();

    let conflict = h.outbound.last_for(ana.id).unwrap();
    assert!(conflict.text.contains("Google map"));
    assert!(conflict.text.contains("https://maps.app.goo.gl/ana"));
    assert!(conflict.text.contains("https://maps.app.goo.gl/ben"));
    assert!(conflict.choices.iter().any(|choice| choice.value == "retry"));

    let session = h.manager.session(ana.id, &id("№310")).await.unwrap();
    assert!(matches!(session.state(), SessionState::Conflicted { .. }));

    let (record, version) = h.stored("№310");
    assert_eq!(version, RecordVersion::new(2));
    assert_eq!(record.map_link.unwrap().as_str(), "https://maps.app.goo.gl/ben");

    h.send(&ana, Payload::Command(Command::Retry)).await.unwrap();
    let session = h.manager.session(ana.id, &id("№310")).await.unwrap();
    assert_eq!(session.state(), &SessionState::SelectingField);
    assert_eq!(session.base().version, RecordVersion::new(2));
    assert!(session.staged().is_empty());
}

#[tokio::test]
async fn retry_after_conflict_commits_remaining_fields() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "map", "https://maps.app.goo.gl/ana").await;
    h.set_field(&ana, "whatsapp", "@casaverde").await;

    let mut theirs = CompanyRecord::new(id("№310"), "Casa Verde").unwrap();
    theirs.map_link = Some(MapLink::from_canonical("https://maps.app.goo.gl/ben").unwrap());
    h.records.insert(theirs);

    h.confirm(&ana).await.unwrap();
    h.send(&ana, Payload::Choice("retry".to_string())).await.unwrap();

    let (record, version) = h.stored("№310");
    assert_eq!(version, RecordVersion::new(3));
    assert_eq!(record.map_link.unwrap().as_str(), "https://maps.app.goo.gl/ben");
    assert_eq!(record.messaging.unwrap().as_str(), "@casaverde");
    assert_eq!(h.manager.session_count(), 0);
}

#[tokio::test]
async fn sessions_on_different_records_do_not_interfere() {
    let h = harness();
    let ana = admin(1);
    let ben = admin(2);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "name", "Casa Verde Bistro").await;
    h.edit(&ben, "№311").await;
    h.set_field(&ben, "phone", "2222 3333").await;

    h.confirm(&ana).await.unwrap();

    let ben_session = h.manager.session(ben.id, &id("№311")).await.unwrap();
    assert_eq!(ben_session.base().version, RecordVersion::INITIAL);
    assert_eq!(ben_session.staged().len(), 1);
    assert_eq!(h.stored("№311").1, RecordVersion::INITIAL);

    h.confirm(&ben).await.unwrap();
    assert_eq!(h.stored("№310").0.name, "Casa Verde Bistro");
    assert_eq!(
        h.stored("№311").0.phone,
        Some(PhoneNumber::from_canonical("+50622223333").unwrap())
    );
}

#[tokio::test]
async fn idle_session_is_cancelled_and_not_resumed() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "phone", "8888 7777").await;
    h.clock.advance(Duration::from_secs(901));

    let error = h.confirm(&ana).await.unwrap_err();
    assert_eq!(error, SessionError::SessionNotFound);
    assert_eq!(h.manager.session_count(), 0);
    assert_eq!(h.stored("№310").1, RecordVersion::INITIAL);

    let texts: Vec<String> = h
        .outbound
        .messages_for(ana.id)
        .into_iter()
        .map(|message| message.text)
        .collect();
    assert!(texts.iter().any(|text| text.contains("timed out")));
}

#[tokio::test]
async fn sweep_expires_only_idle_sessions() {
    let h = harness();
    let ana = admin(1);
    let ben = admin(2);

    h.edit(&ana, "№310").await;
    h.clock.advance(Duration::from_secs(600));
    h.edit(&ben, "№311").await;
    h.clock.advance(Duration::from_secs(400));

    assert_eq!(h.manager.sweep_expired().await, 1);
    assert_eq!(h.manager.session_count(), 1);
    assert!(h.manager.session(ben.id, &id("№311")).await.is_some());
}

#[tokio::test]
async fn edit_requires_permission_and_existing_record() {
    let h = harness();
    let scoped = Operator::new(
        OperatorId::new(5),
        "Scoped",
        Permissions::Records(BTreeSet::from([id("№311"), id("№999")])),
    );

    let error = h
        .send(&scoped, Payload::Command(Command::Edit(id("№310"))))
        .await
        .unwrap_err();
    assert_eq!(error.code(), "not_authorized");

    let error = h
        .send(&scoped, Payload::Command(Command::Edit(id("№999"))))
        .await
        .unwrap_err();
    assert_eq!(error.code(), "record_not_found");
    assert!(h.last_text(&scoped).starts_with("record_not_found"));
    assert_eq!(h.manager.session_count(), 0);

    h.edit(&scoped, "№311").await;
    assert_eq!(h.manager.session_count(), 1);
}

#[tokio::test]
async fn find_by_name_starts_the_matching_session() {
    let h = harness();
    let ana = admin(1);
    let find = |name: &str| Payload::Command(Command::Find(name.to_string()));

    h.send(&ana, find("  soda la ESQUINA ")).await.unwrap();
    assert!(h.manager.session(ana.id, &id("№311")).await.is_some());

    let error = h.send(&ana, find("Casa Azul")).await.unwrap_err();
    assert_eq!(error, SessionError::NameNotFound("Casa Azul".to_string()));
    assert!(h.last_text(&ana).starts_with("record_not_found"));

    h.records
        .insert(CompanyRecord::new(id("№312"), "casa verde").unwrap());
    let error = h.send(&ana, find("Casa Verde")).await.unwrap_err();
    assert_eq!(error.code(), "ambiguous_record");
    assert!(h.last_text(&ana).contains("№310, №312"));
    assert_eq!(h.manager.session_count(), 1);
}

#[tokio::test]
async fn unfilled_lists_blank_fields_of_editable_records() {
    let h = harness();
    let scoped = Operator::new(
        OperatorId::new(5),
        "Scoped",
        Permissions::Records(BTreeSet::from([id("№311")])),
    );

    h.edit(&scoped, "№311").await;
    h.set_field(&scoped, "phone", "8888 7777").await;
    h.confirm(&scoped).await.unwrap();

    h.send(&scoped, Payload::Command(Command::Unfilled))
        .await
        .unwrap();
    assert_eq!(
        h.last_text(&scoped),
        "Records with blank fields:\n\
         №311 Soda La Esquina: Type, Photos, Google map, WhatsApp, Hours of operation"
    );
    assert_eq!(h.manager.session_count(), 0);
}

#[tokio::test]
async fn events_without_target_need_a_single_session() {
    let h = harness();
    let ana = admin(1);

    assert_eq!(h.text(&ana, "phone").await, Err(SessionError::SessionNotFound));

    h.edit(&ana, "№310").await;
    h.edit(&ana, "№311").await;

    let error = h.text(&ana, "phone").await.unwrap_err();
    assert_eq!(error.code(), "ambiguous_session");

    h.send_to(&ana, "№311", Payload::Text("phone".to_string()))
        .await
        .unwrap();
    let session = h.manager.session(ana.id, &id("№311")).await.unwrap();
    assert!(matches!(session.state(), SessionState::AwaitingValue { .. }));
}

#[tokio::test]
async fn second_edit_on_same_record_replaces_session() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "phone", "8888 7777").await;
    h.edit(&ana, "№310").await;

    assert_eq!(h.manager.session_count(), 1);
    let session = h.manager.session(ana.id, &id("№310")).await.unwrap();
    assert!(session.staged().is_empty());
    assert_eq!(h.confirm(&ana).await, Err(SessionError::EmptyPatch));
}

fn attach(bytes: &[u8], slot: Option<usize>) -> Payload {
    Payload::Attachment(Attachment {
        bytes: bytes.to_vec(),
        slot,
    })
}

#[tokio::test]
async fn replacing_a_photo_swaps_the_reference() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.text(&ana, "photos").await.unwrap();
    h.send(&ana, attach(JPEG, None)).await.unwrap();
    h.confirm(&ana).await.unwrap();

    let first = h.stored("№310").0.photos;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].content_hash(), Some(content_hash(JPEG).as_str()));

    h.edit(&ana, "№310").await;
    h.text(&ana, "photos").await.unwrap();
    h.send(&ana, attach(PNG, Some(1))).await.unwrap();
    h.confirm(&ana).await.unwrap();

    let second = h.stored("№310").0.photos;
    assert_eq!(second.len(), 1);
    assert_ne!(second[0], first[0]);
    assert!(h.files.contains(&second[0]));
    assert_eq!(h.files.delete_count(), 0);
}

#[tokio::test]
async fn photo_shared_by_two_records_survives_removal_from_one() {
    let h = harness();
    let ana = admin(1);

    for record in ["№310", "№311"] {
        h.edit(&ana, record).await;
        h.text(&ana, "photos").await.unwrap();
        h.send(&ana, attach(PNG, None)).await.unwrap();
        h.confirm(&ana).await.unwrap();
    }
    let shared = h.stored("№311").0.photos;
    assert_eq!(h.stored("№310").0.photos, shared);
    assert_eq!(h.files.len(), 1);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "photos", "remove 1").await;
    h.confirm(&ana).await.unwrap();

    assert!(h.stored("№310").0.photos.is_empty());
    assert_eq!(h.stored("№311").0.photos, shared);
    for asset in &shared {
        assert!(h.files.contains(asset), "№311 points at a missing {asset}");
    }
}

#[tokio::test]
async fn cancelled_session_leaves_uploads_unreferenced() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.text(&ana, "photos").await.unwrap();
    h.send(&ana, attach(JPEG, None)).await.unwrap();
    h.send(&ana, Payload::Command(Command::Cancel)).await.unwrap();

    assert_eq!(h.files.len(), 1);
    assert!(h.stored("№310").0.photos.is_empty());
    assert_eq!(h.stored("№310").1, RecordVersion::INITIAL);
    assert_eq!(h.manager.session_count(), 0);
}

#[tokio::test]
async fn unavailable_store_keeps_session_confirming() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "phone", "8888 7777").await;
    h.records.fail_next_writes(1);

    let error = h.confirm(&ana).await.unwrap_err();
    assert_eq!(error.code(), "sync_unavailable");
    assert!(h.last_text(&ana).starts_with("sync_unavailable"));
    let session = h.manager.session(ana.id, &id("№310")).await.unwrap();
    assert!(matches!(session.state(), SessionState::Confirming { .. }));

    h.confirm(&ana).await.unwrap();
    assert_eq!(h.stored("№310").1, RecordVersion::new(2));
}

#[tokio::test]
async fn write_applied_despite_error_is_still_announced() {
    let h = harness();
    let ana = admin(1);

    h.edit(&ana, "№310").await;
    h.set_field(&ana, "phone", "8888 7777").await;
    h.records.lose_next_write_acks(1);

    let error = h.confirm(&ana).await.unwrap_err();
    assert_eq!(error.code(), "sync_unavailable");
    assert_eq!(h.stored("№310").1, RecordVersion::new(2));

    h.confirm(&ana).await.unwrap();
    assert!(h.last_text(&ana).starts_with("Saved №310"));
    assert_eq!(h.stored("№310").1, RecordVersion::new(2));
    let summary = h.outbound.last_for(WATCHER).unwrap().text;
    assert!(summary.contains("1. Phone numbers: - -> +50688887777"));
}
