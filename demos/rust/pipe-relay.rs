// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Relays a message across an OS pipe through the event loop: one chain pushes the message into the pipe, another
//! reads it back and forwards it to standard output once it arrived in full.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::chainloop::{
    runtime::{
        config::Config,
        fd::{
            pipe,
            FileDesc,
        },
        logging,
    },
    tasks::{
        AndThenTask,
        ReadTask,
        WriteTask,
    },
    EventLoop,
    SharedTask,
};
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Program Arguments
//======================================================================================================================

/// Program Arguments
#[derive(Debug)]
pub struct ProgramArguments {
    /// Message to relay.
    message: String,
    /// Configuration file.
    config_path: Option<String>,
}

impl ProgramArguments {
    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_about: &'static str) -> Result<Self> {
        let matches: ArgMatches = Command::new(app_name)
            .about(app_about)
            .arg(
                Arg::new("message")
                    .long("message")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("TEXT")
                    .default_value("hello from the event loop\n")
                    .help("Sets the message to relay"),
            )
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("FILE")
                    .help("Sets the configuration file"),
            )
            .get_matches();

        let message: String = matches
            .get_one::<String>("message")
            .ok_or(anyhow::anyhow!("missing message"))?
            .to_string();
        let config_path: Option<String> = matches.get_one::<String>("config").map(|path| path.to_string());

        Ok(Self { message, config_path })
    }

    /// Returns the `message` command line argument.
    pub fn message(&self) -> String {
        self.message.clone()
    }

    /// Returns the `config` command line argument.
    pub fn config_path(&self) -> Option<String> {
        self.config_path.clone()
    }
}

//======================================================================================================================
// main()
//======================================================================================================================

fn main() -> Result<()> {
    logging::initialize();
    let args: ProgramArguments = ProgramArguments::new("pipe-relay", "Relays a message across a pipe")?;

    let mut event_loop: EventLoop = match args.config_path() {
        Some(path) => {
            let config: Config = match Config::new(&path) {
                Ok(config) => config,
                Err(e) => anyhow::bail!("failed to read configuration file: {:?}", e),
            };
            match EventLoop::from_config(&config) {
                Ok(event_loop) => event_loop,
                Err(e) => anyhow::bail!("failed to create event loop: {:?}", e),
            }
        },
        None => match EventLoop::new() {
            Ok(event_loop) => event_loop,
            Err(e) => anyhow::bail!("failed to create event loop: {:?}", e),
        },
    };

    let (reader, writer) = match pipe() {
        Ok(ends) => ends,
        Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
    };
    let message: Vec<u8> = args.message().into_bytes();

    // One chain pushes the message into the pipe.
    let push: Rc<RefCell<WriteTask>> = Rc::new(RefCell::new(WriteTask::new(writer, message.clone())));
    match event_loop.schedule(push) {
        Ok(id) => println!("scheduled push task: {:?}", id),
        Err(e) => anyhow::bail!("failed to schedule push task: {:?}", e),
    };

    // The other reads it back and forwards it to standard output once it arrived in full.
    let pop: Rc<RefCell<ReadTask>> = Rc::new(RefCell::new(ReadTask::new(reader, message.len())));
    let pop_handle: Rc<RefCell<ReadTask>> = pop.clone();
    let stdout: FileDesc = FileDesc::new(unsafe { libc::dup(libc::STDOUT_FILENO) });
    stdout.set_nonblocking().map_err(|e| anyhow::anyhow!("{:?}", e))?;
    let relay: Rc<RefCell<AndThenTask>> = Rc::new(RefCell::new(AndThenTask::new(
        pop,
        Box::new(move || {
            let data: Vec<u8> = pop_handle.borrow_mut().take_data();
            let forward: SharedTask = Rc::new(RefCell::new(WriteTask::new(stdout, data)));
            forward
        }),
    )));
    match event_loop.schedule(relay) {
        Ok(id) => println!("scheduled relay task: {:?}", id),
        Err(e) => anyhow::bail!("failed to schedule relay task: {:?}", e),
    };

    match event_loop.run() {
        Ok(()) => Ok(()),
        Err(e) => anyhow::bail!("event loop failed: {:?}", e),
    }
}
