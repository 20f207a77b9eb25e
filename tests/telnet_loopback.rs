//! Drives `TelnetAdapter` end-to-end against a scripted local TCP listener
//! instead of a real device, the way the teacher crate prefers
//! fixture/loopback-driven tests over live-network tests.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use switchgate::adapter::ProtocolAdapter;
use switchgate::config::ConnectionConfig;
use switchgate::telnet_adapter::TelnetAdapter;

async fn run_scripted_server(stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"login: ").await.unwrap();
    let mut username_line = String::new();
    reader.read_line(&mut username_line).await.unwrap();
    assert_eq!(username_line.trim_end(), "admin");

    write_half.write_all(b"Password: ").await.unwrap();
    let mut password_line = String::new();
    reader.read_line(&mut password_line).await.unwrap();
    assert_eq!(password_line.trim_end(), "hunter2");

    write_half.write_all(b"Welcome\r\ndevice> ").await.unwrap();

    let mut command_line = String::new();
    reader.read_line(&mut command_line).await.unwrap();
    assert_eq!(command_line.trim_end(), "show version");

    // Echo the command back (as a real telnet server would), then send the
    // output followed by a fresh prompt.
    write_half.write_all(command_line.as_bytes()).await.unwrap();
    // A bare, short prompt so the adapter's trailing-prompt-line strip rule
    // (<=3 trimmed characters) applies, leaving only the real output.
    write_half
        .write_all(b"Cisco IOS Software, Version 15.1\r\n#")
        .await
        .unwrap();
}

#[tokio::test]
async fn telnet_adapter_logs_in_and_runs_a_command() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        run_scripted_server(stream).await;
    });

    let config = ConnectionConfig {
        protocol: "telnet".to_string(),
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "admin".to_string(),
        password: "hunter2".to_string(),
        timeout: 5,
    };

    let mut adapter = TelnetAdapter::new();
    adapter.connect(&config).await.expect("login should succeed");
    assert!(adapter.is_connected());

    let result = adapter
        .execute_command("show version")
        .await
        .expect("command should succeed");

    assert!(result.success);
    assert_eq!(result.output.trim(), "Cisco IOS Software, Version 15.1");

    adapter.disconnect().await.unwrap();
    server.await.unwrap();
}
