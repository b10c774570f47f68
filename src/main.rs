use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use antswitch::comms::ExternalCommandListener;
use antswitch::config::{self, DEFAULT_SETTINGS_PATH, DEFAULT_STATE_PATH};
use antswitch::controller::describe_line;
use antswitch::error::{ConfigError, LinkError, MacroError};
use antswitch::hal::create_connector;
use antswitch::interaction::Output;
use antswitch::link::{RelayLink, StatusEvent};
use antswitch::types::{ContactState, MacroSlot, RelayId};
use antswitch::SwitchController;

#[derive(Parser, Debug)]
#[command(name = "antswitch", version, about = "Networked antenna switch relay control")]
struct Cli {
    /// Settings file (controller address, profiles, hotspots)
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Session state file (relay states, macros, current profile)
    #[arg(long, default_value = DEFAULT_STATE_PATH)]
    state: PathBuf,

    /// Profile to make active before running the command
    #[arg(long)]
    profile: Option<String>,

    /// Use the simulated controller instead of the network
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether the controller answers
    Probe,
    /// Set one relay
    Set {
        relay: u8,
        #[arg(value_enum)]
        state: StateArg,
    },
    /// Execute macro N (1-based) of the current profile
    Macro { number: usize },
    /// Save the current relay states as macro N
    SaveMacro {
        number: usize,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// De-energize every relay of the current profile
    Reset,
    /// List profiles, relays and macros
    Profiles,
    /// Keep the link alive and serve external switch commands
    Run,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StateArg {
    Energize,
    DeEnergize,
}

impl From<StateArg> for ContactState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Energize => ContactState::Energized,
            StateArg::DeEnergize => ContactState::DeEnergized,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("Antenna switch v{}", env!("CARGO_PKG_VERSION"));
    let settings = config::load_settings(&cli.settings)?;
    let state = config::load_state(&cli.state)?;

    let (events, rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_status(rx));
    let link = RelayLink::new(create_connector(cli.simulate), events, settings.timing.link_timing());
    let mut controller = SwitchController::new(settings, state, link);

    if let Some(profile) = &cli.profile {
        controller.select_profile(profile)?;
    }

    let result = execute(&mut controller, cli.command, &cli.state).await;

    controller.shutdown().await;
    drop(controller);
    let _ = reporter.await;
    result
}

async fn execute(controller: &mut SwitchController, command: Commands, state_path: &Path) -> Result<()> {
    match command {
        Commands::Probe => {
            let endpoint = controller
                .settings()
                .network
                .endpoint()
                .ok_or(LinkError::NotConfigured)?;
            controller.link_mut().configure(endpoint.clone()).await;
            if controller.link_mut().probe().await {
                println!("{} is responding", endpoint);
            } else {
                println!("{} is not responding", endpoint);
            }
            Ok(())
        }
        Commands::Set { relay, state } => {
            let relay = RelayId::new(relay).ok_or(ConfigError::InvalidRelay(relay))?;
            controller.start().await;
            let outputs = controller.request_set_relay(relay, state.into()).await?;
            draw(&outputs);
            controller.link_mut().settle().await;
            save_state(controller, state_path)
        }
        Commands::Macro { number } => {
            let slot = MacroSlot::from_number(number).ok_or(MacroError::SlotOutOfRange(number))?;
            controller.start().await;
            let outputs = controller.execute_macro(slot).await?;
            draw(&outputs);
            controller.link_mut().settle().await;
            save_state(controller, state_path)
        }
        Commands::SaveMacro { number, label } => {
            let slot = MacroSlot::from_number(number).ok_or(MacroError::SlotOutOfRange(number))?;
            controller.save_macro(slot, &label)?;
            save_state(controller, state_path)
        }
        Commands::Reset => {
            controller.start().await;
            let outputs = controller.reset_relays().await;
            draw(&outputs);
            controller.link_mut().settle().await;
            save_state(controller, state_path)
        }
        Commands::Profiles => {
            list_profiles(controller);
            Ok(())
        }
        Commands::Run => run(controller, state_path).await,
    }
}

async fn run(controller: &mut SwitchController, state_path: &Path) -> Result<()> {
    let profile = controller
        .active_profile()
        .ok_or_else(|| anyhow!("No profile configured in settings"))?
        .to_string();
    info!("Running profile '{}'", profile);
    draw(&controller.contact_lines());
    controller.start().await;

    let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
    let external = &controller.settings().external;
    let listener = if external.enabled {
        let bind = external.bind.clone();
        Some(ExternalCommandListener::bind(&bind).await?.spawn(cmd_tx))
    } else {
        drop(cmd_tx);
        None
    };

    let mut poll = interval(controller.settings().timing.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                controller.check_link().await;
            }
            Some(cmd) = cmd_rx.recv() => {
                match controller.handle_external(cmd).await {
                    Ok(outputs) => draw(&outputs),
                    Err(e) => warn!("Ext cmd failed: {}", e),
                }
            }
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    if let Some(handle) = listener {
        handle.abort();
    }
    save_state(controller, state_path)
}

async fn report_status(mut rx: mpsc::UnboundedReceiver<StatusEvent>) {
    while let Some(event) = rx.recv().await {
        match event.relay {
            Some(relay) => println!("[relay {}] {}", relay, event.text),
            None => println!("{}", event.text),
        }
    }
}

fn draw(outputs: &[Output]) {
    for output in outputs {
        if let Output::ContactLine { relay, line } = output {
            info!("{}", describe_line(*relay, line));
        }
    }
}

fn list_profiles(controller: &SwitchController) {
    let active = controller.active_profile();
    for (name, profile) in &controller.settings().profiles {
        let marker = if Some(name.as_str()) == active { "*" } else { " " };
        let relays: Vec<String> = profile.complete_relays().map(|r| r.to_string()).collect();
        println!("{} {} relays [{}]", marker, name, relays.join(", "));
        if let Some(slots) = controller.macros().macros().get(name) {
            for (slot, saved) in slots {
                println!("    macro {}: {}", slot, saved.label);
            }
        }
    }
}

fn save_state(controller: &SwitchController, path: &Path) -> Result<()> {
    config::save_yaml(path, &controller.session_state())
        .with_context(|| format!("Failed to save session state to {}", path.display()))
}
