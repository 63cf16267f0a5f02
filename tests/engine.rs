//! End-to-end engine tests: durability, crash recovery, indexes, and repair.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use mv2_core::{
    AskRequest, DoctorOptions, DoctorStatus, FrameStatus, Memory, Mv2Error, PutOptions,
    SearchRequest, Ticket, TimelineQuery, VerificationStatus, doctor, verify,
};
use tempfile::tempdir;

#[test]
fn committed_state_survives_reopen() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("durable.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let first = mem.put(b"alpha note about rust storage").expect("put 1");
    let second = mem.put(b"beta note about search engines").expect("put 2");
    mem.commit().expect("commit");
    drop(mem);

    let mut reopened = Memory::open(&path).expect("reopen");
    let stats = reopened.stats().expect("stats");
    assert_eq!(stats.frame_count, 2);
    assert_eq!(stats.active_frame_count, 2);
    assert_eq!(
        reopened.frame_content(first).expect("content 1"),
        b"alpha note about rust storage"
    );
    assert_eq!(
        reopened.frame_content(second).expect("content 2"),
        b"beta note about search engines"
    );
}

#[test]
fn uncommitted_puts_recover_through_wal_replay() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("crash.mv2");

    let mut mem = Memory::create(&path).expect("create");
    mem.put(b"committed before the crash").expect("put 1");
    mem.commit().expect("commit");
    let lost_id = mem.put(b"written but never committed").expect("put 2");
    // Simulate a crash: drop without commit. Drop does not flush.
    drop(mem);

    let mut recovered = Memory::open(&path).expect("recover");
    assert_eq!(recovered.stats().expect("stats").frame_count, 2);
    assert_eq!(
        recovered.frame_content(lost_id).expect("content"),
        b"written but never committed"
    );

    // Replay is idempotent: a second recovery cycle sees the same state.
    drop(recovered);
    let recovered_again = Memory::open(&path).expect("recover again");
    assert_eq!(recovered_again.stats().expect("stats").frame_count, 2);
}

#[test]
fn tombstoned_delete_recovers_and_filters() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("delete.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let keep = mem.put(b"keep this searchable entry").expect("put keep");
    let gone = mem.put(b"drop this searchable entry").expect("put gone");
    mem.commit().expect("commit");
    mem.delete_frame(gone).expect("delete");
    drop(mem);

    let mut reopened = Memory::open(&path).expect("reopen");
    assert_eq!(
        reopened.frame(gone).expect("frame meta").status,
        FrameStatus::Deleted
    );
    assert!(matches!(
        reopened.frame_content(gone),
        Err(Mv2Error::FrameNotFound { .. })
    ));

    let hits = reopened
        .search(&SearchRequest::new("searchable"))
        .expect("search")
        .hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].frame_id, keep);

    let timeline = reopened
        .timeline(&TimelineQuery::default())
        .expect("timeline");
    assert_eq!(timeline.count, 1);
    assert_eq!(timeline.entries[0].frame_id, keep);
}

#[test]
fn large_payload_chunks_and_reassembles() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("chunks.mv2");

    let mut content = vec![0u8; 150 * 1024];
    for (index, byte) in content.iter_mut().enumerate() {
        *byte = fastrand::u8(..) ^ (index as u8);
    }

    let mut mem = Memory::create(&path).expect("create");
    let root = mem.put(&content).expect("put");
    mem.commit().expect("commit");

    let meta = mem.frame(root).expect("meta");
    assert_eq!(meta.chunk_count, Some(3));
    assert_eq!(meta.parent_id, Some(root));
    assert_eq!(mem.frame_content(root).expect("reassembled"), content);

    let timeline = mem.timeline(&TimelineQuery::default()).expect("timeline");
    assert_eq!(timeline.count, 1);
    assert_eq!(timeline.entries[0].child_frames, vec![root + 1, root + 2]);

    // Deleting any chunk tombstones the whole group.
    mem.delete_frame(root + 1).expect("delete chunk");
    mem.commit().expect("commit delete");
    for id in root..root + 3 {
        assert_eq!(mem.frame(id).expect("meta").status, FrameStatus::Deleted);
    }
}

#[test]
fn search_ordering_is_deterministic() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("ranking.mv2");

    let mut mem = Memory::create(&path).expect("create");
    mem.put(b"gravity gravity gravity pulls objects down")
        .expect("put strong");
    mem.put(b"gravity is one of four fundamental forces acting between masses everywhere")
        .expect("put weak");
    mem.put(b"identical twin text").expect("put twin a");
    mem.put(b"identical twin text").expect("put twin b");
    mem.commit().expect("commit");

    let first = mem.search(&SearchRequest::new("gravity")).expect("search");
    assert_eq!(first.hits[0].frame_id, 0, "higher tf ranks first");

    let twins = mem.search(&SearchRequest::new("twin")).expect("twins");
    assert_eq!(twins.hits[0].frame_id, 2, "ties break on ascending id");
    assert_eq!(twins.hits[1].frame_id, 3);

    let again = mem.search(&SearchRequest::new("gravity")).expect("again");
    assert_eq!(first.hits, again.hits);
}

#[test]
fn uri_lookup_is_last_write_wins() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("uri.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let options = PutOptions::builder().uri("notes/today.md").build();
    mem.put_with_options(b"first revision", &options)
        .expect("put v1");
    let newer = mem
        .put_with_options(b"second revision", &options)
        .expect("put v2");
    mem.commit().expect("commit");

    let resolved = mem.frame_by_uri("notes/today.md").expect("resolve");
    assert_eq!(resolved.id, newer);
    assert!(matches!(
        mem.frame_by_uri("notes/missing.md"),
        Err(Mv2Error::FrameNotFoundByUri { .. })
    ));
}

#[test]
fn dedup_returns_existing_frame() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("dedup.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let options = PutOptions::builder().dedup(true).build();
    let original = mem
        .put_with_options(b"exactly the same bytes", &options)
        .expect("put 1");
    let duplicate = mem
        .put_with_options(b"exactly the same bytes", &options)
        .expect("put 2");
    assert_eq!(original, duplicate);
    mem.commit().expect("commit");
    assert_eq!(mem.stats().expect("stats").frame_count, 1);

    // A third identical put still resolves to the committed frame.
    let after_commit = mem
        .put_with_options(b"exactly the same bytes", &options)
        .expect("put 3");
    assert_eq!(after_commit, original);
}

#[test]
fn tickets_enforce_sequence_and_capacity() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("tickets.mv2");

    let mut mem = Memory::create(&path).expect("create");
    // The default grant occupies seq_no 1, so a replayed grant is rejected.
    let stale = Ticket::new("issuer-a", 1);
    let err = mem.apply_ticket(&stale).expect_err("stale must fail");
    assert!(matches!(err, Mv2Error::TicketSequence { .. }));
    assert_eq!(err.code(), 22);

    // Shrink capacity to just above the fixed regions, then overflow it with
    // an incompressible payload.
    let tight = Ticket::new("issuer-a", 2).capacity_bytes(300 * 1024);
    mem.apply_ticket(&tight).expect("apply tight grant");
    let payload: Vec<u8> = (0..48 * 1024).map(|_| fastrand::u8(..)).collect();
    let err = mem.put(&payload).expect_err("put must exceed capacity");
    assert!(matches!(err, Mv2Error::CapacityExceeded { .. }));
    assert_eq!(err.code(), 21);

    let roomy = Ticket::new("issuer-a", 3).capacity_bytes(8 * 1024 * 1024);
    mem.apply_ticket(&roomy).expect("apply roomy grant");
    mem.put(&payload).expect("put now fits");
}

#[test]
fn second_writer_is_locked_out() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("locked.mv2");

    let mem = Memory::create(&path).expect("create");
    let err = Memory::open(&path).expect_err("second open must fail");
    assert!(matches!(err, Mv2Error::Locked { .. }));
    assert_eq!(err.code(), 5);
    drop(mem);

    Memory::open(&path).expect("open after release");
}

#[test]
fn read_only_handle_rejects_mutation() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("readonly.mv2");

    let mut mem = Memory::create(&path).expect("create");
    mem.put(b"visible to readers").expect("put");
    mem.commit().expect("commit");
    drop(mem);

    let mut reader = Memory::open_read_only(&path).expect("open ro");
    assert!(reader.is_read_only());
    assert_eq!(reader.stats().expect("stats").frame_count, 1);
    let err = reader.put(b"nope").expect_err("put must fail");
    assert!(matches!(err, Mv2Error::ReadOnly { .. }));
    assert_eq!(err.code(), 33);
}

#[test]
fn encrypted_and_sidecar_files_are_refused() {
    let dir = tempdir().expect("tmp");

    let capsule = dir.path().join("secret.mv2");
    fs::write(&capsule, b"MV2E pretend ciphertext").expect("write capsule");
    let err = Memory::open(&capsule).expect_err("capsule must be refused");
    assert!(matches!(err, Mv2Error::EncryptedFile { .. }));
    assert_eq!(err.code(), 31);

    let shadowed = dir.path().join("shadowed.mv2");
    let mem = Memory::create(&shadowed).expect("create");
    drop(mem);
    fs::write(dir.path().join("shadowed.mv2.wal"), b"stray").expect("write sidecar");
    let err = Memory::open(&shadowed).expect_err("sidecar must be refused");
    assert!(matches!(err, Mv2Error::AuxiliaryFileDetected { .. }));
    assert_eq!(err.code(), 32);
}

#[test]
fn verify_reports_structural_damage_without_erroring() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("verify.mv2");

    let mut mem = Memory::create(&path).expect("create");
    mem.put(b"healthy content for verification").expect("put");
    mem.commit().expect("commit");
    drop(mem);

    let healthy = verify(&path, true).expect("verify healthy");
    assert_eq!(healthy.overall_status, VerificationStatus::Passed);
    for name in ["magic", "header", "footer", "toc", "wal", "payload_integrity"] {
        assert_eq!(
            healthy.check(name).expect("check present").status,
            VerificationStatus::Passed,
            "{name} should pass"
        );
    }

    let shallow = verify(&path, false).expect("shallow verify");
    assert_eq!(
        shallow.check("payload_integrity").expect("check").status,
        VerificationStatus::Skipped
    );

    // Flip one byte inside the header.
    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("open raw");
    file.seek(SeekFrom::Start(20)).expect("seek");
    file.write_all(&[0xFF]).expect("corrupt");
    drop(file);

    let damaged = verify(&path, true).expect("verify damaged");
    assert_eq!(damaged.overall_status, VerificationStatus::Failed);
    assert_eq!(
        damaged.check("header").expect("check").status,
        VerificationStatus::Failed
    );
}

#[test]
fn doctor_recovers_a_torn_header() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("doctor.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let id = mem.put(b"content that must survive repair").expect("put");
    mem.commit().expect("commit");
    drop(mem);

    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("open raw");
    file.seek(SeekFrom::Start(20)).expect("seek");
    file.write_all(&[0xFF]).expect("corrupt header");
    drop(file);

    // Dry run only plans.
    let plan = doctor(
        &path,
        &DoctorOptions {
            dry_run: true,
            ..Default::default()
        },
    )
    .expect("dry run");
    assert_eq!(plan.status, DoctorStatus::PlanOnly);
    assert!(!plan.actions.is_empty());
    assert_eq!(
        verify(&path, false).expect("still damaged").overall_status,
        VerificationStatus::Failed
    );

    let report = doctor(&path, &DoctorOptions::default()).expect("repair");
    assert_eq!(report.status, DoctorStatus::Healed);

    let mut healed = Memory::open(&path).expect("open healed");
    assert_eq!(
        healed.frame_content(id).expect("content"),
        b"content that must survive repair"
    );
}

#[test]
fn doctor_reports_clean_files() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("clean.mv2");

    let mut mem = Memory::create(&path).expect("create");
    mem.put(b"nothing wrong here").expect("put");
    mem.commit().expect("commit");
    drop(mem);

    let report = doctor(&path, &DoctorOptions::default()).expect("doctor");
    assert_eq!(report.status, DoctorStatus::Clean);
    assert!(report.actions.is_empty());
    assert!(report.to_json().expect("json").contains("clean"));
}

#[test]
fn timeline_honors_range_reverse_and_limit() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("timeline.mv2");

    let mut mem = Memory::create(&path).expect("create");
    for (offset, text) in [(100, "earliest"), (200, "middle"), (300, "latest")] {
        let options = PutOptions::builder().timestamp(offset).build();
        mem.put_with_options(text.as_bytes(), &options).expect("put");
    }
    mem.commit().expect("commit");

    let all = mem.timeline(&TimelineQuery::default()).expect("all");
    assert_eq!(all.count, 3);
    assert!(all.entries[0].preview.contains("earliest"));

    let ranged = mem
        .timeline(&TimelineQuery::builder().since(150).until(250).build())
        .expect("ranged");
    assert_eq!(ranged.count, 1);
    assert!(ranged.entries[0].preview.contains("middle"));

    let newest_first = mem
        .timeline(&TimelineQuery::builder().reverse(true).limit(1).build())
        .expect("reverse");
    assert_eq!(newest_first.count, 1);
    assert!(newest_first.entries[0].preview.contains("latest"));

    let err = mem
        .timeline(&TimelineQuery::builder().since(300).until(100).build())
        .expect_err("inverted range");
    assert!(matches!(err, Mv2Error::InvalidQuery { .. }));
}

#[test]
fn ask_answers_extractively_with_citations() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("ask.mv2");

    let mut mem = Memory::create(&path).expect("create");
    mem.put(b"the embedded wal lives inside the container file")
        .expect("put 1");
    mem.put(b"commits rewrite the toc and the footer atomically")
        .expect("put 2");
    mem.commit().expect("commit");

    let response = mem
        .ask(&AskRequest::new("where does the wal live"))
        .expect("ask");
    assert!(!response.citations.is_empty());
    let answer = response.answer.expect("answer");
    assert!(answer.contains("[1]"));
    assert!(answer.to_lowercase().contains("wal"));

    let mut context_request = AskRequest::new("where does the wal live");
    context_request.context_only = true;
    let context = mem.ask(&context_request).expect("context only");
    assert!(context.answer.is_none());
    assert!(!context.retrieval.hits.is_empty());
}

#[test]
fn auto_tags_and_dates_are_extracted() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("enrich.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let options = PutOptions::builder()
        .uri("journal/2024/standup.MD")
        .kind("note")
        .build();
    let id = mem
        .put_with_options(b"standup for 2024-05-17, follow-up on 2024-05-20", &options)
        .expect("put");
    mem.commit().expect("commit");

    let frame = mem.frame(id).expect("frame");
    assert_eq!(frame.tags.get("kind").map(String::as_str), Some("note"));
    assert_eq!(frame.tags.get("ext").map(String::as_str), Some("md"));
    assert_eq!(frame.content_dates, vec!["2024-05-17", "2024-05-20"]);
    assert_eq!(frame.content_checksum_hex().len(), 64);
}

#[test]
fn no_raw_frames_keep_search_but_not_content() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("noraw.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let options = PutOptions::builder()
        .no_raw(true)
        .search_text("redacted payroll summary for march")
        .build();
    let id = mem
        .put_with_options(b"secret payroll numbers", &options)
        .expect("put");
    mem.commit().expect("commit");

    let hits = mem
        .search(&SearchRequest::new("payroll"))
        .expect("search")
        .hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].frame_id, id);

    let err = mem.frame_content(id).expect_err("content must be absent");
    assert!(matches!(err, Mv2Error::InvalidFrame { .. }));
}

#[test]
fn buffered_mutations_are_invisible_until_commit() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("buffered.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let id = mem.put(b"staged entry about lighthouses").expect("put");

    assert!(matches!(mem.frame(id), Err(Mv2Error::FrameNotFound { .. })));
    assert!(matches!(
        mem.frame_content(id),
        Err(Mv2Error::FrameNotFound { .. })
    ));
    let hits = mem
        .search(&SearchRequest::new("lighthouses"))
        .expect("search")
        .hits;
    assert!(hits.is_empty());
    assert_eq!(
        mem.timeline(&TimelineQuery::default()).expect("timeline").count,
        0
    );
    assert_eq!(mem.stats().expect("stats").frame_count, 0);

    mem.commit().expect("commit");
    assert_eq!(mem.frame(id).expect("frame").status, FrameStatus::Active);
    assert_eq!(
        mem.frame_content(id).expect("content"),
        b"staged entry about lighthouses"
    );
    let hits = mem
        .search(&SearchRequest::new("lighthouses"))
        .expect("search")
        .hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].frame_id, id);
}

#[test]
fn failed_chunked_put_leaves_no_partial_group() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("atomic.mv2");

    let mut mem = Memory::create(&path).expect("create");
    // Room for roughly two of the three chunks an incompressible 150 KiB
    // payload needs; the put must fail without staging anything.
    let grant = Ticket::new("issuer-a", 2).capacity_bytes(400_000);
    mem.apply_ticket(&grant).expect("apply grant");

    let payload: Vec<u8> = (0..150 * 1024).map(|_| fastrand::u8(..)).collect();
    let err = mem.put(&payload).expect_err("put must exceed capacity");
    assert!(matches!(err, Mv2Error::CapacityExceeded { .. }));

    mem.commit().expect("commit");
    assert_eq!(mem.stats().expect("stats").frame_count, 0);
    assert_eq!(
        mem.timeline(&TimelineQuery::default()).expect("timeline").count,
        0
    );
    drop(mem);

    // Nothing to replay either: the WAL carries no record of the failed put.
    let mut reopened = Memory::open(&path).expect("reopen");
    assert_eq!(reopened.stats().expect("stats").frame_count, 0);
}

#[test]
fn commit_keeps_previous_generation_footer_intact() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("generations.mv2");

    let mut mem = Memory::create(&path).expect("create");
    let first: Vec<u8> = (0..8192).map(|_| fastrand::u8(..)).collect();
    mem.put(&first).expect("put 1");
    mem.commit().expect("commit 1");

    let mut raw = fs::File::open(&path).expect("open raw");
    let header = mv2_core::io::HeaderCodec::read(&mut raw).expect("header");
    let old_footer_offset = header.footer_offset;
    drop(raw);

    // The second generation's payload run is larger than the first
    // generation's tail artifacts, so writing it at the old data end would
    // have clobbered the footer below.
    let second: Vec<u8> = (0..8192).map(|_| fastrand::u8(..)).collect();
    mem.put(&second).expect("put 2");
    mem.commit().expect("commit 2");
    drop(mem);

    let mut raw = fs::File::open(&path).expect("reopen raw");
    raw.seek(SeekFrom::Start(old_footer_offset)).expect("seek");
    let mut buf = [0u8; mv2_core::footer::FOOTER_SIZE];
    raw.read_exact(&mut buf).expect("read old footer");
    let footer = mv2_core::CommitFooter::decode(&buf).expect("old footer still valid");
    assert_eq!(footer.generation, 1);
}

#[test]
fn stats_track_deletes_without_forgetting_frames() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("accounting.mv2");

    let mut mem = Memory::create(&path).expect("create");
    mem.put(b"first ledger entry").expect("put 1");
    let victim = mem.put(b"second ledger entry").expect("put 2");
    mem.put(b"third ledger entry").expect("put 3");
    mem.commit().expect("commit");

    let before = mem.stats().expect("stats before");
    assert_eq!(before.frame_count, 3);
    assert_eq!(before.active_frame_count, 3);

    mem.delete_frame(victim).expect("delete");
    mem.commit().expect("commit delete");

    let after = mem.stats().expect("stats after");
    assert_eq!(after.frame_count, 3, "tombstones keep their slot");
    assert_eq!(after.active_frame_count, before.active_frame_count - 1);
}

#[test]
fn deep_verify_catches_payload_corruption() {
    let dir = tempdir().expect("tmp");
    let path = dir.path().join("bitrot.mv2");

    let mut mem = Memory::create(&path).expect("create");
    // Incompressible payload so the stored bytes sit verbatim in the file.
    let payload: Vec<u8> = (0..2048).map(|_| fastrand::u8(..)).collect();
    let id = mem.put(&payload).expect("put");
    mem.commit().expect("commit");
    let offset = mem.frame(id).expect("frame").payload_offset;
    assert!(offset > 0);
    drop(mem);

    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .expect("open raw");
    let mut original = [0u8; 1];
    file.seek(SeekFrom::Start(offset + 100)).expect("seek");
    file.read_exact(&mut original).expect("read original");
    file.seek(SeekFrom::Start(offset + 100)).expect("seek back");
    file.write_all(&[original[0] ^ 0xFF]).expect("corrupt payload");
    drop(file);

    let report = verify(&path, true).expect("verify");
    assert_eq!(
        report.check("payload_integrity").expect("check").status,
        VerificationStatus::Failed
    );

    let mut reopened = Memory::open(&path).expect("open");
    assert!(matches!(
        reopened.frame_content(id),
        Err(Mv2Error::ChecksumMismatch { .. })
    ));
}
