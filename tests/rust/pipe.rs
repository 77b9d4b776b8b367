// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg(target_os = "linux")]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::chainloop::{
    runtime::fd::pipe,
    tasks::{
        AndThenTask,
        ReadTask,
        WriteTask,
    },
    EventLoop,
    SharedTask,
    Task,
    TaskId,
    TaskState,
};
use ::std::{
    cell::RefCell,
    os::fd::RawFd,
    rc::Rc,
    thread,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// How long helper threads sleep before writing, to force the loop to actually block on the poller.
const WRITER_DELAY: Duration = Duration::from_millis(50);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Writes `payload` to `fd` from a helper thread after a delay, then closes it.
fn spawn_delayed_writer(fd: RawFd, payload: &'static [u8]) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(WRITER_DELAY);
        let nwritten: isize = unsafe { libc::write(fd, payload.as_ptr() as *const libc::c_void, payload.len()) };
        assert_eq!(nwritten, payload.len() as isize);
        unsafe { libc::close(fd) };
    })
}

//======================================================================================================================
// test_read_task_wakes_on_late_write()
//======================================================================================================================

/// Tests that a task blocked on an empty pipe is woken once data shows up and runs to completion.
#[test]
fn test_read_task_wakes_on_late_write() -> Result<()> {
    let (reader, writer) = match pipe() {
        Ok(ends) => ends,
        Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
    };
    let mut event_loop: EventLoop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => anyhow::bail!("failed to create event loop: {:?}", e),
    };

    let read_task: Rc<RefCell<ReadTask>> = Rc::new(RefCell::new(ReadTask::new(reader, 5)));
    let id: TaskId = match event_loop.schedule(read_task.clone()) {
        Ok(id) => id,
        Err(e) => anyhow::bail!("failed to schedule read task: {:?}", e),
    };

    let writer_thread: thread::JoinHandle<()> = spawn_delayed_writer(writer.leak(), b"hello");
    match event_loop.run() {
        Ok(()) => (),
        Err(e) => anyhow::bail!("event loop failed: {:?}", e),
    };
    writer_thread.join().unwrap();

    chainloop::ensure_eq!(event_loop.contains(id), false);
    chainloop::ensure_eq!(read_task.borrow().state(), TaskState::Done);
    chainloop::ensure_eq!(read_task.borrow().data(), b"hello");
    Ok(())
}

//======================================================================================================================
// test_relay_across_pipes()
//======================================================================================================================

/// Tests a two-step chain: read from one pipe, then write what arrived into another. The chain's blocking descriptor
/// changes shape mid-flight, so this exercises registration re-keying end to end.
#[test]
fn test_relay_across_pipes() -> Result<()> {
    let (source_reader, source_writer) = match pipe() {
        Ok(ends) => ends,
        Err(e) => anyhow::bail!("failed to create source pipe: {:?}", e),
    };
    let (sink_reader, sink_writer) = match pipe() {
        Ok(ends) => ends,
        Err(e) => anyhow::bail!("failed to create sink pipe: {:?}", e),
    };
    let mut event_loop: EventLoop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => anyhow::bail!("failed to create event loop: {:?}", e),
    };

    let payload: &'static [u8] = b"relay";

    // Step one reads the payload; the continuation forwards whatever arrived.
    let read_step: Rc<RefCell<ReadTask>> = Rc::new(RefCell::new(ReadTask::new(source_reader, payload.len())));
    let read_handle: Rc<RefCell<ReadTask>> = read_step.clone();
    let relay: Rc<RefCell<AndThenTask>> = Rc::new(RefCell::new(AndThenTask::new(
        read_step,
        Box::new(move || {
            let data: Vec<u8> = read_handle.borrow_mut().take_data();
            let write_step: SharedTask = Rc::new(RefCell::new(WriteTask::new(sink_writer, data)));
            write_step
        }),
    )));
    match event_loop.schedule(relay.clone()) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("failed to schedule relay: {:?}", e),
    };

    // An independent chain drains the sink pipe so the whole transfer is observable.
    let verify_task: Rc<RefCell<ReadTask>> = Rc::new(RefCell::new(ReadTask::new(sink_reader, payload.len())));
    match event_loop.schedule(verify_task.clone()) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("failed to schedule verify task: {:?}", e),
    };

    let writer_thread: thread::JoinHandle<()> = spawn_delayed_writer(source_writer.leak(), payload);
    match event_loop.run() {
        Ok(()) => (),
        Err(e) => anyhow::bail!("event loop failed: {:?}", e),
    };
    writer_thread.join().unwrap();

    chainloop::ensure_eq!(relay.borrow().state(), TaskState::Done);
    chainloop::ensure_eq!(verify_task.borrow().state(), TaskState::Done);
    chainloop::ensure_eq!(verify_task.borrow().data(), payload);
    Ok(())
}

//======================================================================================================================
// test_cancel_blocked_task()
//======================================================================================================================

/// Tests that cancelling a blocked task empties the loop without the descriptor ever becoming ready.
#[test]
fn test_cancel_blocked_task() -> Result<()> {
    let (reader, _writer) = match pipe() {
        Ok(ends) => ends,
        Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
    };
    let mut event_loop: EventLoop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => anyhow::bail!("failed to create event loop: {:?}", e),
    };

    let read_task: Rc<RefCell<ReadTask>> = Rc::new(RefCell::new(ReadTask::new(reader, 5)));
    let id: TaskId = match event_loop.schedule(read_task.clone()) {
        Ok(id) => id,
        Err(e) => anyhow::bail!("failed to schedule read task: {:?}", e),
    };

    match event_loop.cancel(id) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("failed to cancel read task: {:?}", e),
    };

    // Nothing left to drive; run returns immediately instead of blocking on the empty pipe.
    match event_loop.run() {
        Ok(()) => (),
        Err(e) => anyhow::bail!("event loop failed: {:?}", e),
    };
    chainloop::ensure_eq!(event_loop.is_empty(), true);
    chainloop::ensure_eq!(read_task.borrow().state(), TaskState::Running);
    Ok(())
}

//======================================================================================================================
// test_interleaved_ready_and_blocked_tasks()
//======================================================================================================================

/// Tests that an always-ready chain keeps making progress while another chain blocks on I/O.
#[test]
fn test_interleaved_ready_and_blocked_tasks() -> Result<()> {
    let (reader, writer) = match pipe() {
        Ok(ends) => ends,
        Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
    };
    let (spare_reader, spare_writer) = match pipe() {
        Ok(ends) => ends,
        Err(e) => anyhow::bail!("failed to create spare pipe: {:?}", e),
    };
    drop(spare_reader);
    let mut event_loop: EventLoop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => anyhow::bail!("failed to create event loop: {:?}", e),
    };

    // A spare pipe with the read end closed is always writable, so this chain is effectively always ready to run.
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    let busy_task: Rc<RefCell<WriteTask>> = Rc::new(RefCell::new(WriteTask::new(spare_writer, b"spin".to_vec())));
    match event_loop.schedule(busy_task.clone()) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("failed to schedule busy task: {:?}", e),
    };

    let read_task: Rc<RefCell<ReadTask>> = Rc::new(RefCell::new(ReadTask::new(reader, 4)));
    match event_loop.schedule(read_task.clone()) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("failed to schedule read task: {:?}", e),
    };

    let writer_thread: thread::JoinHandle<()> = spawn_delayed_writer(writer.leak(), b"data");
    match event_loop.run() {
        Ok(()) => (),
        Err(e) => anyhow::bail!("event loop failed: {:?}", e),
    };
    writer_thread.join().unwrap();

    chainloop::ensure_eq!(read_task.borrow().data(), b"data");
    chainloop::ensure_eq!(busy_task.borrow().state() != TaskState::Running, true);
    Ok(())
}
