pub mod error;
pub mod events;
pub mod settings;
pub mod store;
pub mod utils;
pub mod weighbridge;
pub mod workflow;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use events::{CoreEvent, EventSink};
use settings::SettingsStore;
use store::{InitOutcome, TicketStore};
use weighbridge::{SystemPorts, WeighbridgeSession};
use workflow::{Command, Console, Reply, WeighmentWorkflow};

/// Data directory used when `WEIGHDESK_DATA_DIR` is not set.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Everything one operator station needs, wired together.
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub store: Arc<TicketStore>,
    pub session: Arc<WeighbridgeSession>,
    pub images_dir: PathBuf,
}

impl AppState {
    /// Opens settings and the record file under `data_dir`, migrating the
    /// record file if its header is out of date.
    pub fn bootstrap(data_dir: &Path, sink: Arc<dyn EventSink>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        if !settings.path().exists() {
            settings.save()?;
        }
        let storage = settings.storage();

        let images_dir = data_dir.join(&storage.images_folder);
        std::fs::create_dir_all(&images_dir).with_context(|| {
            format!("Failed to create images folder {}", images_dir.display())
        })?;

        let (store, outcome) = TicketStore::open(data_dir.join(&storage.data_file))
            .context("Failed to open the ticket record file")?;
        match &outcome {
            InitOutcome::Created => info!("Created {}", store.path().display()),
            InitOutcome::Ready => info!("Using {}", store.path().display()),
            InitOutcome::Migrated(report) => warn!(
                "Migrated {} records in {}; original saved as {}",
                report.rows,
                store.path().display(),
                report.backup.display()
            ),
        }

        // Tickets left pending by an earlier run resume at second weighment.
        let pending = store.pending()?;
        if !pending.is_empty() {
            info!("{} tickets awaiting second weighment", pending.len());
        }

        let session = WeighbridgeSession::new(Arc::new(SystemPorts), settings.sampler(), sink);

        Ok(Self {
            settings: Arc::new(settings),
            store: Arc::new(store),
            session: Arc::new(session),
            images_dir,
        })
    }

    pub fn workflow(&self, sink: Arc<dyn EventSink>) -> WeighmentWorkflow {
        WeighmentWorkflow::new(
            Arc::clone(&self.store),
            self.session.clone(),
            sink,
            self.settings.station().form,
        )
    }
}

fn data_dir() -> PathBuf {
    std::env::var_os("WEIGHDESK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn print_event(event: &CoreEvent) {
    match event {
        CoreEvent::WeightUpdated { weight } => println!("[weight] {weight} kg"),
        CoreEvent::LinkDegraded {
            port,
            consecutive_failures,
        } => println!("[link] {port}: {consecutive_failures} reads failed in a row"),
        CoreEvent::LinkRecovered { port } => println!("[link] {port}: reading again"),
        CoreEvent::TicketStateChanged { ticket_no, state } => {
            println!("[ticket] {ticket_no}: {}", state.label())
        }
        CoreEvent::SaveResult { success, ticket } => {
            let outcome = if *success { "saved" } else { "NOT saved" };
            println!("[save] {} {outcome}", ticket.ticket_no)
        }
    }
}

/// Runs the operator console on stdin until `quit` or end of input.
pub async fn run() -> anyhow::Result<()> {
    utils::logging::init();
    info!("Weighdesk starting up...");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<CoreEvent>();
    let sink: Arc<dyn EventSink> = Arc::new(event_tx);

    let state = AppState::bootstrap(&data_dir(), Arc::clone(&sink))?;
    let mut console = Console::new(
        Arc::clone(&state.session),
        state.workflow(Arc::clone(&sink)),
        Arc::clone(&state.settings),
        state.images_dir.clone(),
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    println!("{}", workflow::commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match Command::parse(&line) {
            Ok(command) => console.execute(command).await,
            Err(err) => Err(err),
        };
        match reply {
            Ok(Reply::Text(text)) => println!("{text}"),
            Ok(Reply::Quit) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }

    state.session.disconnect().await;
    drop(console);
    drop(sink);
    drop(state);
    if let Err(err) = printer.await {
        error!("Event printer stopped abnormally: {err}");
    }
    info!("Weighdesk stopped");
    Ok(())
}
