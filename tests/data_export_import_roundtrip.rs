use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(extra_env: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_epoind");
    let mut child = Command::new(exe)
        .env("EPOIN_DEFAULT_ROLE", "admin")
        .env_remove("EPOIN_WORKSPACE")
        .envs(extra_env.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn epoind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(v: &serde_json::Value) -> Option<&str> {
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
}

fn result(v: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(
        v.get("ok").and_then(|o| o.as_bool()),
        Some(true),
        "expected ok response, got {}",
        v
    );
    &v["result"]
}

fn open_signed_in(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    user_id: &str,
) {
    let _ = result(&request(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    ));
    let _ = result(&request(
        stdin,
        reader,
        "in",
        "session.signIn",
        json!({ "userId": user_id }),
    ));
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> String {
    let created = request(stdin, reader, "s", "students.create", json!({ "name": name }));
    let student = &result(&created)["student"];
    assert_eq!(student["points"].as_i64(), Some(0));
    student["id"].as_str().expect("student id").to_string()
}

fn create_rule(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    description: &str,
    points: i64,
    kind: &str,
) -> String {
    let created = request(
        stdin,
        reader,
        "r",
        "rules.create",
        json!({ "description": description, "points": points, "type": kind }),
    );
    result(&created)["rule"]["id"]
        .as_str()
        .expect("rule id")
        .to_string()
}

fn points_by_name(v: &serde_json::Value) -> Vec<(String, i64)> {
    let mut out: Vec<(String, i64)> = v["students"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|s| Some((s["name"].as_str()?.to_string(), s["points"].as_i64()?)))
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

#[test]
fn export_then_import_into_fresh_workspace_keeps_natural_keys() {
    let src_ws = temp_dir("epoin-export-src");
    let dst_ws = temp_dir("epoin-export-dst");
    let out_dir = temp_dir("epoin-export-out");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    open_signed_in(&mut stdin, &mut reader, &src_ws, "guru-a");

    let ana = create_student(&mut stdin, &mut reader, "Ana");
    let _ = create_student(&mut stdin, &mut reader, "Budi");
    let _ = create_rule(&mut stdin, &mut reader, "Juara kelas", 10, "achievement");
    let _ = create_rule(&mut stdin, &mut reader, "Terlambat", 5, "violation");
    let _ = result(&request(
        &mut stdin,
        &mut reader,
        "p",
        "points.apply",
        json!({ "studentId": ana, "action": "add", "points": 12, "reason": "Lomba" }),
    ));

    let inline = request(&mut stdin, &mut reader, "x0", "data.export", json!({}));
    let doc = &result(&inline)["data"];
    assert_eq!(doc["students"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(doc["rules"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(doc["transactions"].as_array().map(|a| a.len()), Some(1));
    assert!(doc["exportedAt"].as_str().is_some());

    let written = request(
        &mut stdin,
        &mut reader,
        "x1",
        "data.export",
        json!({ "outPath": out_dir.to_string_lossy() }),
    );
    let written = result(&written);
    let file_name = written["fileName"].as_str().expect("file name");
    assert!(file_name.starts_with("epoin_backup_"));
    assert!(file_name.ends_with(".json"));
    let export_path = PathBuf::from(written["path"].as_str().expect("export path"));
    assert!(export_path.is_file());

    let _ = result(&request(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        json!({ "path": dst_ws.to_string_lossy() }),
    ));
    let _ = result(&request(
        &mut stdin,
        &mut reader,
        "in2",
        "session.signIn",
        json!({ "userId": "guru-b" }),
    ));

    let imported = request(
        &mut stdin,
        &mut reader,
        "imp1",
        "data.import",
        json!({ "path": export_path.to_string_lossy() }),
    );
    let summary = &result(&imported)["summary"];
    assert_eq!(summary["students"]["inserted"].as_u64(), Some(2));
    assert_eq!(summary["rules"]["inserted"].as_u64(), Some(2));
    assert_eq!(summary["transactionsSkipped"].as_u64(), Some(1));

    let listed = request(&mut stdin, &mut reader, "l1", "students.list", json!({}));
    assert_eq!(
        points_by_name(result(&listed)),
        vec![("Ana".to_string(), 12), ("Budi".to_string(), 0)]
    );
    let listed = request(&mut stdin, &mut reader, "l1b", "students.list", json!({}));
    assert!(result(&listed)["students"]
        .as_array()
        .map(|a| a.iter().all(|s| s["user_id"].as_str() == Some("guru-b")))
        .unwrap_or(false));

    let again = request(
        &mut stdin,
        &mut reader,
        "imp2",
        "data.import",
        json!({ "path": export_path.to_string_lossy() }),
    );
    let summary = &result(&again)["summary"];
    assert_eq!(summary["students"]["inserted"].as_u64(), Some(0));
    assert_eq!(summary["students"]["updated"].as_u64(), Some(2));
    assert_eq!(summary["rules"]["updated"].as_u64(), Some(2));
    assert_eq!(result(&again)["studentCount"].as_u64(), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(src_ws);
    let _ = std::fs::remove_dir_all(dst_ws);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bare_array_import_overwrites_by_natural_key() {
    let workspace = temp_dir("epoin-import-array");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    open_signed_in(&mut stdin, &mut reader, &workspace, "guru-a");

    let _ = create_student(&mut stdin, &mut reader, "Ana");

    let imported = request(
        &mut stdin,
        &mut reader,
        "imp",
        "data.import",
        json!({
            "data": [
                { "id": "foreign-id", "name": "Ana", "points": 40, "user_id": "someone-else" },
                { "name": "Citra", "points": 5 }
            ]
        }),
    );
    let summary = &result(&imported)["summary"];
    assert_eq!(summary["students"]["updated"].as_u64(), Some(1));
    assert_eq!(summary["students"]["inserted"].as_u64(), Some(1));

    let view = request(&mut stdin, &mut reader, "v", "roster.view", json!({}));
    assert_eq!(
        points_by_name(result(&view)),
        vec![("Ana".to_string(), 40), ("Citra".to_string(), 5)]
    );

    let students_only = request(
        &mut stdin,
        &mut reader,
        "x",
        "data.export",
        json!({ "entity": "students" }),
    );
    assert_eq!(
        result(&students_only)["data"].as_array().map(|a| a.len()),
        Some(2)
    );

    let bad_shape = request(
        &mut stdin,
        &mut reader,
        "bad",
        "data.import",
        json!({ "data": [{ "name": "Dedi" }, { "name": "" }] }),
    );
    assert_eq!(error_code(&bad_shape), Some("bad_import_shape"));
    let view = request(&mut stdin, &mut reader, "v2", "roster.view", json!({}));
    assert_eq!(result(&view)["total"].as_u64(), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn backup_bundle_imports_and_rejects_tampering() {
    let workspace = temp_dir("epoin-bundle-ipc");
    let bundle = workspace.join("epoin.backup.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    open_signed_in(&mut stdin, &mut reader, &workspace, "guru-a");

    let _ = create_rule(&mut stdin, &mut reader, "Piket kelas", 2, "achievement");
    let exported = request(
        &mut stdin,
        &mut reader,
        "b",
        "data.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    let exported = result(&exported);
    assert_eq!(exported["bundleFormat"].as_str(), Some("epoin-backup-v1"));
    assert_eq!(exported["sha256"].as_str().map(|s| s.len()), Some(64));

    let imported = request(
        &mut stdin,
        &mut reader,
        "i",
        "data.import",
        json!({ "path": bundle.to_string_lossy() }),
    );
    assert_eq!(
        result(&imported)["summary"]["rules"]["updated"].as_u64(),
        Some(1)
    );

    let tampered = workspace.join("tampered.zip");
    {
        let f = std::fs::File::create(&tampered).expect("create tampered");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            json!({ "format": "epoin-backup-v1", "sha256": "00" })
                .to_string()
                .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("data/export.json", opts).expect("data");
        zip.write_all(b"{\"students\":[],\"rules\":[]}")
            .expect("write data");
        zip.finish().expect("finish zip");
    }
    let rejected = request(
        &mut stdin,
        &mut reader,
        "t",
        "data.import",
        json!({ "path": tampered.to_string_lossy() }),
    );
    assert_eq!(error_code(&rejected), Some("bad_bundle"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
