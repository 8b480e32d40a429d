//! End-to-end tests of the dispatch loop over a real loopback connection,
//! speaking the framed protocol exactly as the front end does.

use std::{
    net::{TcpListener, TcpStream},
    sync::Mutex,
    thread,
};

use reverie::{Channel, DispatchError, Dispatcher, Session, Value};

static INTERPRETER_LOCK: Mutex<()> = Mutex::new(());

/// Connects a front-end channel to a dispatcher running on its own thread,
/// hands the channel to `client`, then reports how the dispatcher ended.
fn with_worker<R>(client: impl FnOnce(&mut Channel) -> R) -> (R, Result<(), DispatchError>) {
    let _guard = INTERPRETER_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let front_end = TcpStream::connect(addr).unwrap();
    let (worker_side, _) = listener.accept().unwrap();

    let worker = thread::spawn(move || {
        let session = Session::new().expect("embedded interpreter should boot");
        let mut dispatcher = Dispatcher::new(Channel::new(worker_side), session);
        dispatcher.run()
    });

    let mut channel = Channel::new(front_end);
    let result = client(&mut channel);
    drop(channel);
    let outcome = worker.join().expect("worker thread must not panic");
    (result, outcome)
}

fn request(name: &str, args: Vec<Value>) -> Value {
    Value::List(vec![Value::Str(name.to_owned()), Value::List(args)])
}

#[test]
fn execute_sends_ack_then_report() {
    let (_, outcome) = with_worker(|channel| {
        channel
            .send(&request("execute", vec![Value::Str("x = 5\n".into())]))
            .unwrap();
        let ack = channel.recv().unwrap();
        assert_eq!(ack, Value::List(vec![Value::Bool(true), Value::None]));
        let report = channel.recv().unwrap();
        assert_eq!(
            report,
            Value::List(vec![Value::Bool(true), Value::None, Value::Str(String::new())])
        );

        // The executed fragment is visible to a later request on the same
        // connection; responses stay strictly FIFO.
        channel.send(&request("complete_firstlevels", vec![])).unwrap();
        let reply = channel.recv().unwrap();
        let lists = reply.as_list().expect("name pair reply");
        let public = lists[0].as_list().unwrap();
        assert!(public.contains(&Value::Str("x".into())), "got: {public:?}");
    });
    assert!(outcome.is_ok(), "peer close ends the loop cleanly: {outcome:?}");
}

#[test]
fn invalid_submission_gets_one_terminal_value() {
    let (_, outcome) = with_worker(|channel| {
        channel
            .send(&request("execute", vec![Value::Str("1 +\n".into())]))
            .unwrap();
        let reply = channel.recv().unwrap();
        let items = reply.as_list().expect("terminal validation value");
        assert_eq!(items[0], Value::Bool(false));
        let location = items[1].as_list().expect("syntax error location");
        assert_eq!(location[1], Value::Int(0), "line is 0-based");

        // No second value arrives for this request; the loop answers the
        // next request immediately.
        channel
            .send(&request("is_incomplete", vec![Value::Str("if True:\n".into())]))
            .unwrap();
        assert_eq!(channel.recv().unwrap(), Value::Bool(true));
    });
    assert!(outcome.is_ok());
}

#[test]
fn incomplete_submission_gets_the_distinct_signal() {
    let (_, outcome) = with_worker(|channel| {
        channel
            .send(&request("execute", vec![Value::Str("if True:\n".into())]))
            .unwrap();
        assert_eq!(
            channel.recv().unwrap(),
            Value::List(vec![Value::Bool(false), Value::None])
        );
    });
    assert!(outcome.is_ok());
}

#[test]
fn unknown_operation_is_fatal_without_a_reply() {
    let (_, outcome) = with_worker(|channel| {
        channel.send(&request("frobnicate", vec![])).unwrap();
        // The worker dies without answering; the front end observes a bare
        // connection close instead of a response frame.
        match channel.recv() {
            Err(reverie::WireError::Closed) => {}
            other => panic!("expected a closed connection, got {other:?}"),
        }
    });
    match outcome {
        Err(DispatchError::UnknownOperation(name)) => assert_eq!(name, "frobnicate"),
        other => panic!("expected UnknownOperation, got {other:?}"),
    }
}

#[test]
fn welcome_text_round_trips() {
    let (_, outcome) = with_worker(|channel| {
        channel.send(&request("get_welcome_text", vec![])).unwrap();
        let Value::Str(text) = channel.recv().unwrap() else {
            panic!("welcome text is a string");
        };
        assert!(text.starts_with("Python "));
    });
    assert!(outcome.is_ok());
}

#[test]
fn history_controls_acknowledge_over_the_wire() {
    let (_, outcome) = with_worker(|channel| {
        channel
            .send(&request("set_result_history_size", vec![Value::Int(10)]))
            .unwrap();
        assert_eq!(channel.recv().unwrap(), Value::None);
        channel
            .send(&request("set_pretty_print", vec![Value::Bool(false)]))
            .unwrap();
        assert_eq!(channel.recv().unwrap(), Value::None);
        channel.send(&request("clear_result_history", vec![])).unwrap();
        assert_eq!(channel.recv().unwrap(), Value::None);
    });
    assert!(outcome.is_ok());
}

#[test]
fn evaluation_failure_crosses_the_wire_as_a_sentinel() {
    let (_, outcome) = with_worker(|channel| {
        channel
            .send(&request(
                "complete_attributes",
                vec![Value::Str("no_such_name_xyz".into())],
            ))
            .unwrap();
        assert_eq!(channel.recv().unwrap(), Value::None);
    });
    assert!(outcome.is_ok());
}
