use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use fern::Dispatch;
use tokio::time::{interval, sleep, Duration};

use mozo::api::{CloseTableApi, CloseTableOutcome};
use mozo::flow::{CloseFlowController, PaymentMethod, Phase};
use mozo::settings::init_settings;

/// Initialize logger function
fn setup_logger(level: &str) -> Result<(), fern::InitError> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info, // Default to Info for invalid values
    };
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

/// Stand-in for the real backend: accepts the close after a short delay.
struct DemoApi;

#[async_trait]
impl CloseTableApi for DemoApi {
    async fn close_table(&self) -> Result<CloseTableOutcome> {
        sleep(Duration::from_millis(300)).await;
        Ok(CloseTableOutcome {
            success: true,
            error: None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = init_settings();
    setup_logger(&settings.log_level).expect("Can't initialize logger");

    let controller = CloseFlowController::new(Arc::new(DemoApi), settings.flow_config());

    if !controller.start_close_flow().await {
        log::error!(
            "close flow did not start: {}",
            controller
                .view()
                .error_text
                .unwrap_or_else(|| "unknown".to_string())
        );
        return Ok(());
    }

    // Poll the controller the way the UI loop does, once per frame tick.
    let mut tick = interval(Duration::from_millis(200));
    let mut last_phase = controller.phase();
    loop {
        tick.tick().await;
        let view = controller.view();
        if view.phase == last_phase {
            continue;
        }
        last_phase = view.phase;
        match view.phase {
            Phase::WaiterComing => log::info!(
                "waiter {} on the way, about {} min",
                view.waiter_name,
                view.estimated_time_minutes
            ),
            Phase::BillReady => {
                log::info!("bill arrived, paying cash");
                controller.confirm_payment(PaymentMethod::Cash).await;
            }
            Phase::Paid => {
                log::info!("session done");
                break;
            }
            other => log::debug!("phase: {other}"),
        }
    }
    controller.teardown();
    Ok(())
}
