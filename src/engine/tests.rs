use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    task::JoinHandle,
};

use super::*;

/// Spin the main loop up over in-memory pipes, handing back our ends:
/// a feed we write engine lines into and a sink of the module's output.
fn start(
    engine: &Engine,
) -> (
    JoinHandle<Result<()>>,
    DuplexStream,
    Lines<BufReader<DuplexStream>>,
) {
    let (their_input, feed) = tokio::io::duplex(READ_BUFFER);
    let (their_output, sink) = tokio::io::duplex(READ_BUFFER);

    let run = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(their_input, their_output).await }
    });

    (run, feed, BufReader::new(sink).lines())
}

async fn expect_line(sink: &mut Lines<BufReader<DuplexStream>>, expected: &str) {
    assert_eq!(sink.next_line().await.unwrap().as_deref(), Some(expected));
}

#[tokio::test]
async fn it_installs_handlers_and_acks_messages() {
    let engine = Engine::new(Options::new("myapp"));

    let pending = engine
        .install("test", 50, None::<Filter>, |_: Message| async move {
            None::<MessageAck>
        })
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>install:50:test::").await;

    feed.write_all(b"%%<install:50:test:true\n").await.unwrap();
    assert!(pending.await.unwrap().success);

    // the handler declines, the message is ack'd unprocessed
    feed.write_all(b"%%>message:abc:1000:test::k=v\n")
        .await
        .unwrap();
    expect_line(&mut sink, "%%<message:abc:false:test::k=v").await;

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_uses_the_handlers_own_ack() {
    let engine = Engine::new(Options::new("myapp"));

    let _pending = engine
        .install("call.route", None::<u64>, None::<Filter>, |message: Message| async move {
            let mut ack = message.ack();
            ack.processed = true;
            ack.retvalue = Some("sip/route".into());
            Some(ack)
        })
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>install::call.route::").await;

    feed.write_all(b"%%<install:100:call.route:true\n")
        .await
        .unwrap();
    feed.write_all(b"%%>message:abc:1000:call.route:oldroute:caller=alice\n")
        .await
        .unwrap();
    expect_line(&mut sink, "%%<message:abc:true:call.route:sip/route:caller=alice").await;

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_correlates_message_acks() {
    let engine = Engine::new(Options::new("myapp"));

    let pending = engine
        .send_message(Message {
            id: "somerandomid".into(),
            time: 1095112794,
            name: "myapp.test".into(),
            retvalue: None,
            kvp: [("testing", "true"), ("done", "75%"), ("path", "/bin:/usr/bin")]
                .into_iter()
                .collect(),
        })
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(
        &mut sink,
        "%%>message:somerandomid:1095112794:myapp.test::testing=true:done=75%%:path=/bin%z/usr/bin",
    )
    .await;

    feed.write_all(b"%%<message:somerandomid:true:myapp.test::\n")
        .await
        .unwrap();

    let ack = pending.await.unwrap();
    assert!(ack.processed);
    assert_eq!(ack.name.as_deref(), Some("myapp.test"));

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_resolves_delayed_answers() {
    let engine = Engine::new(Options::new("myapp"));

    let pending = engine
        .send_message(Message {
            id: "slowpoke".into(),
            time: 1095112794,
            name: "myapp.test".into(),
            retvalue: None,
            kvp: KeyValueList::new(),
        })
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>message:slowpoke:1095112794:myapp.test::").await;

    // the engine may answer with a full message instead of an ack
    feed.write_all(b"%%>message:slowpoke:1095112900:myapp.test:done:\n")
        .await
        .unwrap();

    let ack = pending.await.unwrap();
    assert!(!ack.processed);
    assert_eq!(ack.retvalue.as_deref(), Some("done"));

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_rejects_duplicate_message_ids() {
    let engine = Engine::new(Options::new("myapp"));

    let message = Message {
        id: "once".into(),
        time: 1,
        name: "myapp.test".into(),
        retvalue: None,
        kvp: KeyValueList::new(),
    };

    let _pending = engine.send_message(message.clone()).unwrap();
    assert!(matches!(
        engine.send_message(message),
        Err(Error::RequestOutstanding(_))
    ));
}

#[tokio::test]
async fn it_cancels_requests_on_engine_errors() {
    let engine = Engine::new(Options::new("myapp"));

    let pending = engine
        .install("badname", None::<u64>, None::<Filter>, |_: Message| async move {
            None::<MessageAck>
        })
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>install::badname::").await;

    feed.write_all(b"Error in:%%>install::badname\n")
        .await
        .unwrap();

    assert!(matches!(pending.await, Err(Error::Rejected(_))));

    // a late ack only logs, the entry is gone
    feed.write_all(b"%%<install:100:badname:true\n")
        .await
        .unwrap();

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_orders_startup_traffic() {
    let engine = Engine::new(
        Options::new("myapp")
            .track_param("mytrack")
            .restart(false),
    );

    // issued before `connect`, which still must hit the wire first
    let _install = engine
        .install("test", None::<u64>, None::<Filter>, |_: Message| async move {
            None::<MessageAck>
        })
        .unwrap();
    let _message = engine
        .message("myapp.test", None::<String>, KeyValueList::new())
        .unwrap();
    engine
        .connect(ConnectRole::Global, None::<String>, None::<String>)
        .unwrap();

    let (run, feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>connect:global::").await;
    expect_line(&mut sink, "%%>setlocal:trackparam:mytrack").await;
    expect_line(&mut sink, "%%>setlocal:restart:false").await;
    expect_line(&mut sink, "%%>install::test::").await;

    let message = sink.next_line().await.unwrap().unwrap();
    assert!(message.starts_with("%%>message:myapp."));

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_notifies_watchers() {
    let engine = Engine::new(Options::new("myapp"));
    let (seen_tx, mut seen) = tokio::sync::mpsc::unbounded_channel();

    let pending = engine
        .watch("engine.timer", move |notification: MessageAck| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(notification);
            }
        })
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>watch:engine.timer").await;

    feed.write_all(b"%%<watch:engine.timer:true\n").await.unwrap();
    assert!(pending.await.unwrap().success);

    feed.write_all(b"%%<message::true:engine.timer::time=1095112796\n")
        .await
        .unwrap();

    let notification = seen.recv().await.unwrap();
    assert_eq!(notification.name.as_deref(), Some("engine.timer"));
    assert_eq!(notification.kvp.get("time"), Some("1095112796"));

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_survives_handler_panics() {
    let engine = Engine::new(Options::new("myapp"));

    let _pending = engine
        .install("test", None::<u64>, None::<Filter>, |message: Message| async move {
            assert!(message.id.is_empty(), "the handler blew up");
            None::<MessageAck>
        })
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>install::test::").await;

    feed.write_all(b"%%<install:100:test:true\n").await.unwrap();
    feed.write_all(b"%%>message:abc:1000:test::\n").await.unwrap();

    // the message still gets its default ack
    expect_line(&mut sink, "%%<message:abc:false:test::").await;

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_acks_unhandled_messages() {
    let engine = Engine::new(Options::new("myapp").sequential());

    let (run, mut feed, mut sink) = start(&engine);

    feed.write_all(b"%%>message:abc:1000:nobody.home::\n")
        .await
        .unwrap();
    expect_line(&mut sink, "%%<message:abc:false:nobody.home::").await;

    // malformed lines are logged and dropped, the loop stays up
    feed.write_all(b"%%>gibberish:what\n").await.unwrap();

    feed.write_all(b"%%>message:def:1000:nobody.home::\n")
        .await
        .unwrap();
    expect_line(&mut sink, "%%<message:def:false:nobody.home::").await;

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_shuts_down_on_end_of_stream() {
    let engine = Engine::new(Options::new("myapp"));

    let stopped = Arc::new(AtomicBool::new(false));
    engine.on_stop({
        let stopped = stopped.clone();
        move || stopped.store(true, Ordering::SeqCst)
    });

    let (run, feed, _sink) = start(&engine);

    drop(feed);
    run.await.unwrap().unwrap();

    assert!(stopped.load(Ordering::SeqCst));

    // past shutdown, requests fail synchronously
    assert!(matches!(
        engine.output("too late"),
        Err(Error::Stopped)
    ));
}

#[tokio::test]
async fn it_shuts_down_on_stop() {
    let engine = Engine::new(Options::new("myapp"));

    let (run, _feed, mut sink) = start(&engine);

    engine.output("going down").unwrap();
    engine.stop();

    // queued output is drained before the writer exits
    expect_line(&mut sink, "%%>output:going down").await;

    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_refuses_to_run_twice() {
    let engine = Engine::new(Options::new("myapp"));

    let (run, feed, _sink) = start(&engine);

    drop(feed);
    run.await.unwrap().unwrap();

    let (their_input, _feed) = tokio::io::duplex(READ_BUFFER);
    let (their_output, _sink) = tokio::io::duplex(READ_BUFFER);

    assert!(matches!(
        engine.run(their_input, their_output).await,
        Err(Error::AlreadyRunning)
    ));
}

#[tokio::test]
async fn it_sets_and_queries_local_parameters() {
    let engine = Engine::new(Options::new("myapp"));

    let set = engine.set_local("timeout", "5000").unwrap();
    let get = engine.get_local("engine.version").unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>setlocal:timeout:5000").await;
    expect_line(&mut sink, "%%>setlocal:engine.version:").await;

    feed.write_all(b"%%<setlocal:timeout:5000:true\n")
        .await
        .unwrap();
    feed.write_all(b"%%<setlocal:engine.version:6.4.0:true\n")
        .await
        .unwrap();

    assert!(set.await.unwrap().success);
    assert_eq!(get.await.unwrap().value, "6.4.0");

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_uninstalls_handlers_and_watchers() {
    let engine = Engine::new(Options::new("myapp"));

    let _install = engine
        .install("test", None::<u64>, None::<Filter>, |_: Message| async move {
            None::<MessageAck>
        })
        .unwrap();
    let _watch = engine
        .watch("engine.timer", |_: MessageAck| async move {})
        .unwrap();

    let (run, mut feed, mut sink) = start(&engine);

    expect_line(&mut sink, "%%>install::test::").await;
    expect_line(&mut sink, "%%>watch:engine.timer").await;

    let uninstall = engine.uninstall("test").unwrap();
    expect_line(&mut sink, "%%>uninstall:test").await;
    feed.write_all(b"%%<uninstall:100:test:true\n").await.unwrap();
    assert!(uninstall.await.unwrap().success);

    // the handler is already gone locally, removing it again fails fast
    assert!(matches!(
        engine.uninstall("test"),
        Err(Error::NoSuchHandler(_))
    ));

    let unwatch = engine.unwatch("engine.timer").unwrap();
    expect_line(&mut sink, "%%>unwatch:engine.timer").await;
    feed.write_all(b"%%<unwatch:engine.timer:true\n")
        .await
        .unwrap();
    assert!(unwatch.await.unwrap().success);

    drop(feed);
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn it_rejects_duplicate_registrations() {
    let engine = Engine::new(Options::new("myapp"));

    let _pending = engine
        .install("test", None::<u64>, None::<Filter>, |_: Message| async move {
            None::<MessageAck>
        })
        .unwrap();

    assert!(matches!(
        engine.install("test", None::<u64>, None::<Filter>, |_: Message| async move {
            None::<MessageAck>
        }),
        Err(Error::HandlerInstalled(_))
    ));
}
