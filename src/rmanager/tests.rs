use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
    task::JoinHandle,
};

use super::*;

const GREETING: &str = "YATE 6.4.0-1 r1234 (http://YATE.null.ro) ready on localhost.";

async fn expect(peer: &mut BufReader<DuplexStream>, expected: &str) {
    let mut line = String::new();
    peer.read_line(&mut line).await.unwrap();

    assert_eq!(line.trim_end_matches("\r\n"), expected);
}

async fn answer(peer: &mut BufReader<DuplexStream>, line: &str) {
    peer.get_mut()
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .unwrap();
}

/// Script the server side of a handshake landing at admin level
/// without a password, then hand the peer back for the test body.
fn admin_server(theirs: DuplexStream) -> JoinHandle<BufReader<DuplexStream>> {
    tokio::spawn(async move {
        let mut peer = BufReader::new(theirs);

        answer(&mut peer, GREETING).await;
        expect(&mut peer, "output off").await;
        answer(&mut peer, "Output mode: off").await;
        expect(&mut peer, "debug off").await;
        answer(&mut peer, "Debug level: 10 local on").await;
        expect(&mut peer, "color off").await;
        answer(&mut peer, "Colorized output: no").await;

        peer
    })
}

#[tokio::test]
async fn it_performs_the_handshake() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);
    let server = admin_server(theirs);

    let session = RManager::handshake(ours, None).await.unwrap();

    assert_eq!(session.auth_level(), Some(AuthLevel::Admin));
    assert_eq!(session.header(), GREETING);

    server.await.unwrap();
}

#[tokio::test]
async fn it_authenticates_with_a_password() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);

    let server = tokio::spawn(async move {
        let mut peer = BufReader::new(theirs);

        answer(&mut peer, GREETING).await;
        expect(&mut peer, "output off").await;
        answer(&mut peer, "Not authenticated!").await;
        expect(&mut peer, "debug off").await;
        answer(&mut peer, "Not authenticated!").await;
        expect(&mut peer, "auth secret").await;
        answer(&mut peer, "Authenticated successfully as admin!").await;
        expect(&mut peer, "color off").await;
        answer(&mut peer, "Colorized output: no").await;
    });

    let session = RManager::handshake(ours, Some("secret")).await.unwrap();
    assert_eq!(session.auth_level(), Some(AuthLevel::Admin));

    server.await.unwrap();
}

#[tokio::test]
async fn it_requires_a_password_when_the_server_does() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);

    let server = tokio::spawn(async move {
        let mut peer = BufReader::new(theirs);

        answer(&mut peer, GREETING).await;
        expect(&mut peer, "output off").await;
        answer(&mut peer, "Not authenticated!").await;
    });

    assert!(matches!(
        RManager::handshake(ours, None).await,
        Err(Error::Auth(_))
    ));

    server.await.unwrap();
}

#[tokio::test]
async fn it_refuses_telnet_negotiation() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);

    let server = tokio::spawn(async move {
        let mut peer = BufReader::new(theirs);

        // IAC DO ECHO in front of the greeting
        peer.get_mut()
            .write_all(&[telnet::IAC, telnet::DO, 1])
            .await
            .unwrap();
        answer(&mut peer, GREETING).await;

        // the client must refuse the option before speaking
        let mut refusal = [0; 3];
        tokio::io::AsyncReadExt::read_exact(peer.get_mut(), &mut refusal)
            .await
            .unwrap();
        assert_eq!(refusal, [telnet::IAC, telnet::WONT, 1]);

        expect(&mut peer, "output off").await;
        answer(&mut peer, "Output mode: off").await;
        expect(&mut peer, "debug off").await;
        answer(&mut peer, "Debug level: 10 local on").await;
        expect(&mut peer, "color off").await;
        answer(&mut peer, "Colorized output: no").await;
    });

    let session = RManager::handshake(ours, None).await.unwrap();
    assert_eq!(session.header(), GREETING);

    server.await.unwrap();
}

#[tokio::test]
async fn it_frames_batched_answers() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);
    let server = admin_server(theirs);

    let mut session = RManager::handshake(ours, None).await.unwrap();
    let mut peer = server.await.unwrap();

    let server = tokio::spawn(async move {
        expect(&mut peer, "status").await;
        answer(&mut peer, "%%+status").await;
        answer(
            &mut peer,
            "name=cdrbuild,type=cdr,format=Status|Caller|Called|BillId|Duration;cdrs=5,hungup=0;sip/4=answered|test|99991007|1403660477-4|12",
        )
        .await;
        answer(&mut peer, "name=engine,type=system;plugins=12;sip=loaded").await;
        answer(&mut peer, "%%-status").await;
    });

    let reports = session.status(None, true).await.unwrap();
    assert_eq!(reports.len(), 2);

    let Some(Detail::Fields(fields)) = reports[0].details.get("sip/4") else {
        panic!("expected formatted details")
    };
    assert_eq!(fields.get("Status").map(String::as_str), Some("answered"));
    assert_eq!(fields.get("Duration").map(String::as_str), Some("12"));

    server.await.unwrap();
}

#[tokio::test]
async fn it_parses_uptime() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);
    let server = admin_server(theirs);

    let mut session = RManager::handshake(ours, None).await.unwrap();
    let mut peer = server.await.unwrap();

    let server = tokio::spawn(async move {
        expect(&mut peer, "uptime").await;
        answer(&mut peer, "Uptime: 1 02:11:58 (94318) user: 4.640 kernel: 11.480").await;
        expect(&mut peer, "uptime").await;
        answer(&mut peer, "Uptime: soon").await;
    });

    let uptime = session.uptime().await.unwrap();
    assert_eq!(uptime.total, 94318);
    assert_eq!(uptime.user, 4.64);

    assert!(matches!(session.uptime().await, Err(Error::Unexpected(_))));

    server.await.unwrap();
}

#[tokio::test]
async fn it_maps_error_answers() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);
    let server = admin_server(theirs);

    let mut session = RManager::handshake(ours, None).await.unwrap();
    let mut peer = server.await.unwrap();

    let server = tokio::spawn(async move {
        expect(&mut peer, "frobnicate").await;
        answer(&mut peer, "Cannot understand: frobnicate").await;
        expect(&mut peer, "reload").await;
        answer(&mut peer, "Not authenticated!").await;
    });

    assert!(matches!(
        session.send("frobnicate").await,
        Err(Error::Syntax(_))
    ));
    assert!(matches!(
        session.reload(None).await,
        Err(Error::Permission(_))
    ));

    server.await.unwrap();
}

#[tokio::test]
async fn it_drives_control_commands() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);
    let server = admin_server(theirs);

    let mut session = RManager::handshake(ours, None).await.unwrap();
    let mut peer = server.await.unwrap();

    let server = tokio::spawn(async move {
        expect(&mut peer, "call sip/123 sip:echo@example.org").await;
        answer(&mut peer, "Calling 'sip/123' on 'sip:echo@example.org'").await;
        expect(&mut peer, "drop sip/123 finished").await;
        answer(&mut peer, "Dropped channel 'sip/123' reason 'finished'").await;
        expect(&mut peer, "control sip/123 transfer target=sip/456").await;
        answer(&mut peer, "Control 'sip/123' transfer OK").await;
        expect(&mut peer, "quit").await;
        answer(&mut peer, "Goodbye!").await;
    });

    session.call("sip/123", "sip:echo@example.org").await.unwrap();
    session.drop_channel("sip/123", Some("finished")).await.unwrap();

    let outcome = session
        .control("sip/123", "transfer", [("target", "sip/456")])
        .await
        .unwrap();
    assert_eq!(outcome, "Control 'sip/123' transfer OK");

    session.close().await.unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn it_drives_engine_lifecycle_commands() {
    let (ours, theirs) = tokio::io::duplex(READ_CHUNK);
    let server = admin_server(theirs);

    let mut session = RManager::handshake(ours, None).await.unwrap();
    let mut peer = server.await.unwrap();

    let server = tokio::spawn(async move {
        expect(&mut peer, "output on").await;
        answer(&mut peer, "Output mode: on").await;
        expect(&mut peer, "debug on").await;
        answer(&mut peer, "Debug level: 10 local on").await;
        expect(&mut peer, "reload sip").await;
        answer(&mut peer, "Reinitializing module \"sip\"").await;
        expect(&mut peer, "restart now").await;
        answer(&mut peer, "Engine restarting - bye!").await;
        expect(&mut peer, "stop 2").await;
        answer(&mut peer, "Engine shutting down - bye!").await;
    });

    assert_eq!(session.output_mode(true).await.unwrap(), "Output mode: on");
    assert_eq!(
        session.debug_mode(true).await.unwrap(),
        "Debug level: 10 local on"
    );
    session.reload(Some("sip")).await.unwrap();
    session.restart(true).await.unwrap();
    assert_eq!(
        session.stop(Some(2)).await.unwrap(),
        "Engine shutting down - bye!"
    );

    server.await.unwrap();
}
