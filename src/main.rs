use std::{env, sync::Arc, sync::mpsc, thread, time::Duration};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

use cpugovernor::{
    datasource::{
        config_parser::{RuntimeConfig, reload_tunables},
        file_path::CONFIG_FILE,
        idle_monitor::IdlePoller,
        idle_source::ProcStatIdleSource,
        limits_monitor::LimitsWatcher,
        node_monitor::{monitor_config, monitor_power_state},
        sysfs_driver::SysfsCpufreqDriver,
    },
    model::{
        governor::{Governor, GovernorParts},
        power_state::PowerState,
        runtime::GovernorRuntime,
        tunables::Tunables,
    },
    utils::{
        constants::{AUTHOR, NOTES, VERSION, host::LIMITS_POLL_MS, threads},
        file_operate::check_read_simple,
        log_monitor::monitor_log_level,
        logger::init_logger,
    },
};

fn spawn_monitor<F>(name: &str, body: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            if let Err(e) = body() {
                error!("{thread_name} error: {e:#}");
            }
        })
        .with_context(|| format!("Failed to create {name} thread"))?;
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if let Some(arg) = args.get(1) {
        match arg.as_str() {
            "-h" => {
                println!("{NOTES}");
                println!("{AUTHOR}");
                println!("Usage:");
                println!("\t-v show version");
                println!("\t-h show help");
            }
            "-v" => {
                println!("{NOTES}");
                println!("{AUTHOR}");
                println!("{VERSION}");
            }
            _ => {
                println!("Unknown argument: {arg}");
                println!("Use -h for help");
            }
        }
        return Ok(());
    }

    init_logger()?;

    info!("{NOTES}");
    info!("{AUTHOR}");
    info!("{VERSION}");

    let tunables = Arc::new(Tunables::new());
    let runtime_config = if check_read_simple(CONFIG_FILE) {
        reload_tunables(CONFIG_FILE, &tunables).unwrap_or_else(|e| {
            warn!("Config rejected, using defaults: {e:#}");
            RuntimeConfig::default()
        })
    } else {
        info!("Config file not found: {CONFIG_FILE}, using defaults");
        tunables.log_summary();
        RuntimeConfig::default()
    };

    let driver = Arc::new(SysfsCpufreqDriver::new());
    let online = driver.online_cpus().with_context(|| "Failed to enumerate online CPUs")?;
    let num_cores = online
        .iter()
        .max()
        .map(|&cpu| cpu + 1)
        .ok_or_else(|| anyhow!("No online CPU found"))?;
    info!("Online CPUs: {online:?}");

    let idle_source = Arc::new(ProcStatIdleSource::new());
    let poller = Arc::new(IdlePoller::new(
        idle_source.clone(),
        online.clone(),
        runtime_config.idle_poll(),
    ));

    let governor = Governor::new(
        num_cores,
        GovernorParts {
            driver: driver.clone(),
            idle_source,
            host: poller.clone(),
            tunables: tunables.clone(),
            power: Arc::new(PowerState::new()),
        },
        runtime_config.rearm_interval(),
    );
    let runtime = GovernorRuntime::start(governor.clone())?;

    let mut governed = 0;
    for &cpu in &online {
        match governor.start_core(cpu) {
            Ok(()) => governed += 1,
            Err(e) => warn!("{e:#}"),
        }
    }
    if governed == 0 {
        runtime.shutdown();
        return Err(anyhow!("No CPU could be governed"));
    }
    info!("Governing {governed} CPUs");

    let config_tunables = tunables.clone();
    spawn_monitor(threads::CONFIG_MONITOR, move || monitor_config(config_tunables))?;
    let power_governor = governor.clone();
    spawn_monitor(threads::POWER_MONITOR, move || monitor_power_state(power_governor))?;
    spawn_monitor(threads::LOG_MONITOR, monitor_log_level)?;
    spawn_monitor(threads::IDLE_POLLER, move || poller.run())?;
    let limits = LimitsWatcher::new(
        governor.clone(),
        driver,
        online.clone(),
        Duration::from_millis(LIMITS_POLL_MS),
    );
    spawn_monitor(threads::LIMITS_MONITOR, move || limits.run())?;
    info!("Monitor Inited");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .with_context(|| "Failed to install termination handler")?;

    // 等待终止信号
    let _ = rx.recv();
    info!("Termination requested");

    governor.stop_all();
    runtime.shutdown();
    info!("Stats: {:?}", governor.stats());
    Ok(())
}
