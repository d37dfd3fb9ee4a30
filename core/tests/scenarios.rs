use serde_json::Value;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use surfacecore::damage::{cluster_batch, SeverityTable};
use surfacecore::telemetry::{UploadMetrics, UploadStatus};
use surfacecore::upload::{DispatchOutcome, OutboundBuffer, UploadWorker};
use surfacecore::{DamageEvent, Detection, DetectionEvent, PipelineConfig, Position, RideSession};

fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/upload")
}

/// Serves a single canned HTTP response on a local port.
fn respond_once(response: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_request(&mut stream);
        stream.write_all(response.as_bytes()).unwrap();
    });
    format!("http://127.0.0.1:{port}/upload")
}

/// Accepts a connection, reads the request and never answers.
fn hang_once(hold: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_request(&mut stream);
        thread::sleep(hold);
    });
    format!("http://127.0.0.1:{port}/upload")
}

fn read_request(stream: &mut TcpStream) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).unwrap_or(0);
        if n == 0 {
            return;
        }
        request.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&request);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if request.len() >= end + 4 + length {
                return;
            }
        }
    }
}

const UNAVAILABLE: &str =
    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

fn offline_config(backup_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.upload.endpoint = Some(closed_port_url());
    config.upload.timeout_secs = 2.0;
    config.upload.batch_size = 100;
    config.upload.upload_interval_secs = 600.0;
    config.storage.backup_dir = backup_dir.to_path_buf();
    config
}

fn backup_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "geojson"))
        .collect();
    files.sort();
    files
}

#[test]
fn nearby_potholes_and_distant_crack_form_two_clusters() {
    // 1e-6 deg of latitude is about 0.11 m, so the potholes span 0.44 m.
    let mut events: Vec<DamageEvent> = (0..5)
        .map(|i| {
            let position = Position::new(48.2904 + i as f64 * 1e-6, 11.0434, i as f64).unwrap();
            DamageEvent::new("pothole", position, 0.7 + i as f64 * 0.05)
        })
        .collect();
    let far = Position::new(48.2904 + 0.00045, 11.0434, 10.0).unwrap();
    events.push(DamageEvent::new("crack", far, 0.8));

    let clusters = cluster_batch(events.clone(), 1.0, SeverityTable::default());
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].damage_type, "pothole");
    assert_eq!(clusters[0].member_count(), 5);
    assert_eq!(clusters[1].damage_type, "crack");
    assert_eq!(clusters[1].member_count(), 1);

    // The live path through the coordinator agrees with batch mode.
    let mut session = RideSession::new(PipelineConfig::default());
    for event in events {
        let tick = DetectionEvent::new(
            event.position,
            vec![Detection::new(event.damage_type, event.confidence, [0.0, 0.0, 8.0, 8.0])],
        );
        session.process_tick(tick).unwrap();
    }
    assert_eq!(session.clusters(), clusters.as_slice());
}

#[test]
fn refused_delivery_backs_up_whole_batch_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = offline_config(dir.path());
    let buffer = Arc::new(OutboundBuffer::new(1000, config.upload.batch_size));
    let metrics = Arc::new(UploadMetrics::new());
    let mut worker = UploadWorker::from_config(&config, buffer.clone(), metrics.clone()).unwrap();

    for i in 0..10 {
        let position = Position::new(48.0 + i as f64 * 1e-4, 11.0, 1_700_000_000.0 + i as f64).unwrap();
        buffer.push(DetectionEvent::new(
            position,
            vec![Detection::new("pothole", 0.9, [10.0, 10.0, 50.0, 50.0])],
        ));
    }

    let outcome = worker.tick().unwrap().unwrap();
    assert!(matches!(outcome, DispatchOutcome::BackedUp { events: 10, .. }));
    assert!(buffer.is_empty());
    assert_eq!(metrics.snapshot().last_status, UploadStatus::BackedUp);

    let files = backup_files(dir.path());
    assert_eq!(files.len(), 1);
    let doc: Value = serde_json::from_slice(&fs::read(&files[0]).unwrap()).unwrap();
    let features = doc["features"].as_array().unwrap();
    assert_eq!(features.len(), 10);
    assert!(features.iter().all(|f| f["geometry"]["type"] == "Point"));
    assert_eq!(features[3]["properties"]["timestamp"], 1_700_000_003.0);
}

fn failing_remote_backs_up(endpoint: String, timeout_secs: f64) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = offline_config(dir.path());
    config.upload.endpoint = Some(endpoint);
    config.upload.timeout_secs = timeout_secs;
    let buffer = Arc::new(OutboundBuffer::new(1000, config.upload.batch_size));
    let metrics = Arc::new(UploadMetrics::new());
    let mut worker = UploadWorker::from_config(&config, buffer.clone(), metrics.clone()).unwrap();

    for i in 0..3 {
        let position = Position::new(48.0, 11.0 + i as f64 * 1e-4, 1_700_000_000.0 + i as f64).unwrap();
        buffer.push(DetectionEvent::new(
            position,
            vec![Detection::new("crack", 0.7, [0.0, 0.0, 20.0, 20.0])],
        ));
    }

    let outcome = worker.tick().unwrap().unwrap();
    assert!(matches!(outcome, DispatchOutcome::BackedUp { events: 3, .. }));
    assert!(buffer.is_empty());
    assert_eq!(metrics.snapshot().last_status, UploadStatus::BackedUp);

    let files = backup_files(dir.path());
    assert_eq!(files.len(), 1);
    let doc: Value = serde_json::from_slice(&fs::read(&files[0]).unwrap()).unwrap();
    assert_eq!(doc["features"].as_array().unwrap().len(), 3);
}

#[test]
fn unavailable_remote_is_treated_like_a_transport_failure() {
    failing_remote_backs_up(respond_once(UNAVAILABLE), 5.0);
}

#[test]
fn silent_remote_times_out_into_a_backup() {
    failing_remote_backs_up(hang_once(Duration::from_secs(3)), 0.2);
}

#[test]
fn clean_stop_leaves_no_event_behind() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = RideSession::new(offline_config(dir.path()));
    let uploader = session.spawn_uploader().unwrap();

    for i in 0..7 {
        let position = Position::new(48.0 + i as f64 * 1e-4, 11.0, i as f64).unwrap();
        session
            .process_tick(DetectionEvent::new(position, vec![Detection::new("gravel", 0.8, [0.0; 4])]))
            .unwrap();
    }

    let report = uploader.stop().unwrap();
    assert_eq!(report.backed_up_events, 7);
    assert_eq!(report.retained_events, 0);
    assert_eq!(session.snapshot().backlog, 0);
    assert_eq!(backup_files(dir.path()).len(), 1);
}
