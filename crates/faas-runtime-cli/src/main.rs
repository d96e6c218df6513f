use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use faas_runtime_cli::{PyExecInterpreter, Runtime};
use faas_store::MemoryStore;
use faas_types::message::Message;

#[derive(Parser, Debug)]
#[command(name = "faas-runtime", about = "Single-host serverless bytecode runtime demo")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one call, run it on a freshly spawned worker, and print the result.
    Call {
        user: String,
        function: String,
        /// Python source to run as the call's module body.
        #[arg(long, default_value = "print('hello from faas-runtime')")]
        code: String,
    },
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    match args.command {
        Command::Call { user, function, code } => run_call(user, function, code),
    }
}

fn run_call(user: String, function: String, code: String) {
    let store = Arc::new(MemoryStore::new());
    let runtime = Runtime::new("local", store);

    let fid = faas_types::message::FunctionId::new(&user, &function);
    runtime.store.sadd(&fid.worker_set_name(), &runtime.hostname);

    let worker = runtime.spawn_worker(0, Arc::new(PyExecInterpreter::new()));
    let bind = Message::new_bind(&fid, 1);
    worker.bind_to_function(&bind).expect("bind never fails for a fresh worker");

    let msg = Message::new_call(user, function, code.into_bytes());
    let resultkey = msg.resultkey.clone();
    runtime.scheduler.call_function(msg).expect("local host always has capacity for itself");

    assert!(worker.process_next_message(), "expected the call to be waiting");

    let result = runtime.bus.next_message(&resultkey, Duration::from_secs(5)).expect("worker writes a result");
    println!("success={} output={:?}", result.success, String::from_utf8_lossy(&result.outputdata));
}
