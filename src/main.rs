//! Zigbee mmWave/PIR presence-sensor node — firmware entry point.
//!
//! Two dedicated threads own the LD2412 radar: the manager task holds the
//! UART channel exclusively and drains a depth-16 queue of configuration
//! and raw-read requests, while the fast task drains a depth-256 queue of
//! decoded samples and GPIO edges and forwards them, through the
//! presence-signal channel, to the thread that owns [`Service`] — kept as
//! a single thread here since there is no separate Zigbee-stack task to
//! hand it to. That thread also runs the 1 Hz service tick and drains
//! every other inbound channel (Zigbee events, command deadlines, presence
//! re-arm timers, the reset button).
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use zb_presence_node::adapters::hardware::HardwareAdapter;
use zb_presence_node::adapters::log_sink::LogEventSink;
use zb_presence_node::adapters::nvs::NvsAdapter;
use zb_presence_node::adapters::radar_uart::RadarUart;
use zb_presence_node::adapters::zigbee_stack::ZigbeeStackAdapter;
use zb_presence_node::config::LocalConfig;
use zb_presence_node::diagnostics;
use zb_presence_node::drivers::reset_button::{ResetButtonDriver, ResetButtonEvent};
use zb_presence_node::drivers::status_led::StatusLed;
use zb_presence_node::drivers::task_pin::{spawn_on_core, Core};
use zb_presence_node::drivers::{hw_init, watchdog::Watchdog};
use zb_presence_node::events;
use zb_presence_node::ld2412::component::{
    drain_fast_queue, FastQueue, FastQueueSink, Ld2412Manager, ManagerMsg, ManagerQueue,
};
use zb_presence_node::ld2412::protocol::{Configuration, DistanceRes, NUM_GATES, SystemMode};
use zb_presence_node::ld2412::uart_channel::UartChannel;
use zb_presence_node::service::{Notification, RadarConfigChange, Service};
use zb_presence_node::zigbee::ports::{EventSink, LedIndicatorPort, LedPattern};

/// Queues the manager and fast tasks share with the rest of the firmware.
/// `'static` so both core-pinned threads can reference them for their
/// entire lifetime.
static MANAGER_QUEUE: ManagerQueue = ManagerQueue::new();
static FAST_QUEUE: FastQueue = FastQueue::new();

/// Default radar configuration applied on first boot / factory reset,
/// mirrored into [`LocalConfig::radar_mode`] once the persisted config is
/// loaded.
fn default_radar_configuration(mode: SystemMode) -> Configuration {
    Configuration {
        min_gate: 0,
        max_gate: NUM_GATES as u8 - 1,
        unoccupied_delay_secs: 5,
        output_pin_active_high: true,
        move_thresholds: [30; NUM_GATES],
        still_thresholds: [20; NUM_GATES],
        system_mode: mode,
        distance_res: DistanceRes::Coarse,
    }
}

/// Wraps [`LogEventSink`] so the status LED reacts to command failures and
/// restart-guard trips alongside the plain log line, without threading a
/// second sink through every call site that already takes an `EventSink`.
struct NodeEventSink {
    log: LogEventSink,
    failing: bool,
}

impl NodeEventSink {
    fn new() -> Self {
        Self { log: LogEventSink::new(), failing: false }
    }
}

impl EventSink for NodeEventSink {
    fn emit(&mut self, event: &Notification) {
        match event {
            Notification::CommandFailed { .. } | Notification::RestartGuardTripped => {
                self.failing = true;
            }
            Notification::BindState { state, .. }
                if *state == zb_presence_node::bind::states::BindStateId::Functional =>
            {
                self.failing = false;
            }
            _ => {}
        }
        self.log.emit(event);
    }
}

/// Forwards fast-queue messages into the presence-signal channel the
/// service-owning thread drains. A thin adapter rather than a direct
/// [`Service`] call: the fast task never touches `Service` itself (spec
/// keeps attribute-state access to one thread).
struct PresenceSignalForwarder;

impl FastQueueSink for PresenceSignalForwarder {
    fn on_presence(&mut self, sample: zb_presence_node::ld2412::protocol::PresenceSample) {
        events::push_presence_signal(events::PresenceSignal::MmSample(sample));
    }

    fn on_radar_presence_intr(&mut self, present: bool) {
        events::push_presence_signal(events::PresenceSignal::RadarPresenceIntr(present));
    }

    fn on_pir_presence_intr(&mut self, present: bool) {
        events::push_presence_signal(events::PresenceSignal::PirPresenceIntr(present));
    }
}

/// Builds the radar UART adapter. On ESP-IDF this claims UART2 plus its
/// TX/RX pins from the peripheral singleton; on host targets it's a plain
/// in-memory stand-in.
#[cfg(target_os = "espidf")]
fn open_radar_uart() -> Result<RadarUart> {
    let peripherals = esp_idf_hal::peripherals::Peripherals::take()?;
    RadarUart::new(peripherals.uart2, peripherals.pins.gpio17, peripherals.pins.gpio18)
        .map_err(|e| anyhow::anyhow!("radar UART init failed: {e}"))
}

#[cfg(not(target_os = "espidf"))]
fn open_radar_uart() -> Result<RadarUart> {
    RadarUart::new().map_err(|e| anyhow::anyhow!("radar UART init failed: {e}"))
}

/// Spawns and runs the manager task: owns the radar UART for the lifetime
/// of the process, periodically polling for a frame and draining whatever
/// configuration changes `main()`'s thread has queued.
fn run_manager_task(initial_mode: SystemMode) -> Result<()> {
    let mut port = open_radar_uart()?;
    let channel = UartChannel::new(&mut port);
    let mut manager = Ld2412Manager::new(channel, default_radar_configuration(initial_mode));

    loop {
        MANAGER_QUEUE.drain(|msg| {
            if let Err(e) = manager.handle(msg, &FAST_QUEUE) {
                warn!("ld2412 manager: {e}");
            }
        });
        if let Err(e) = manager.poll_dynamic_background_analysis(&FAST_QUEUE) {
            warn!("ld2412 manager: dynamic background analysis poll failed: {e}");
        }
        let _ = MANAGER_QUEUE.push(ManagerMsg::ReadData);
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("zb-presence-node {} starting", env!("CARGO_PKG_VERSION"));

    diagnostics::install_panic_handler();

    if let Err(e) = hw_init::init_peripherals() {
        log::error!("hw_init: peripheral init failed ({e}) — halting");
        #[allow(clippy::empty_loop)]
        loop {}
    }
    if let Err(e) = hw_init::init_isr_service() {
        log::error!("hw_init: ISR service init failed ({e}) — continuing without GPIO interrupts");
    }
    let watchdog = Watchdog::new();

    let mut nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({e}), running with defaults and no persistence");
            NvsAdapter::default()
        }
    };
    let mut config = match zb_presence_node::zigbee::ports::ConfigPort::load(&nvs) {
        Ok(cfg) => {
            info!("config: loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("config: NVS load failed ({e}), using defaults");
            LocalConfig::default()
        }
    };
    // Incremented and rewritten on every successful mount (spec §3, §6, §8).
    config.restart_count += 1;
    if let Err(e) = zb_presence_node::zigbee::ports::ConfigPort::save(&mut nvs, &config) {
        warn!("config: failed to persist incremented restart count ({e})");
    }
    let radar_mode = config.radar_mode;

    spawn_on_core(Core::App, 10, 4, "ld2412-mgr\0", move || {
        if let Err(e) = run_manager_task(radar_mode) {
            log::error!("ld2412 manager task exited: {e}");
        }
    });

    spawn_on_core(Core::App, 8, 3, "ld2412-fast\0", || {
        let mut sink = PresenceSignalForwarder;
        loop {
            drain_fast_queue(&FAST_QUEUE, &mut sink);
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    });

    let mut hardware = HardwareAdapter::new(StatusLed::new());
    hardware.set_pattern(LedPattern::Idle);
    let mut log_sink = NodeEventSink::new();
    let mut zigbee = ZigbeeStackAdapter::new();
    let mut reset_button = ResetButtonDriver::new();
    let mut service = Service::new(config, own_ieee_addr());

    info!("zb-presence-node ready — entering service loop");

    loop {
        events::drain_zigbee_events(|event| {
            if let Some(change) = service.handle_zigbee_event(event, &mut zigbee, &mut zigbee, &mut zigbee, &mut nvs) {
                apply_radar_config_change(change);
            }
        });

        events::drain_command_deadlines(|slot| {
            service.on_command_deadline(slot, &mut zigbee, &mut zigbee);
        });

        events::drain_presence_timers(|kind| {
            service.on_presence_timer(kind, &mut zigbee, &mut zigbee, &mut zigbee);
        });

        events::drain_presence_signals(|signal| match signal {
            events::PresenceSignal::MmSample(sample) => {
                service.on_mm_sample(sample, &mut zigbee, &mut zigbee, &mut zigbee);
            }
            events::PresenceSignal::RadarPresenceIntr(present) => {
                service.on_radar_presence_intr(present, &mut zigbee, &mut zigbee, &mut zigbee);
            }
            events::PresenceSignal::PirPresenceIntr(present) => {
                service.on_pir_presence_intr(present, &mut zigbee, &mut zigbee, &mut zigbee);
            }
        });

        service.poll_binds(&mut zigbee, &mut zigbee, &mut log_sink);

        if let Some(event) = reset_button.tick(reset_button_now_ms()) {
            match event {
                ResetButtonEvent::SoftRestart => {
                    info!("reset button: soft restart requested");
                    zb_presence_node::zigbee::ports::SchedulerPort::restart_device(&mut zigbee);
                }
                ResetButtonEvent::FactoryReset => {
                    info!("reset button: factory reset requested");
                    let _ = zb_presence_node::adapters::nvs::factory_reset_config(&mut nvs);
                    let _ = MANAGER_QUEUE.push(ManagerMsg::FactoryReset);
                    zb_presence_node::zigbee::ports::SchedulerPort::restart_device(&mut zigbee);
                }
            }
        }

        service.tick(&mut zigbee, &mut zigbee, &mut zigbee, &mut nvs, &mut log_sink);

        watchdog.feed();
        hardware.set_pattern(if log_sink.failing { LedPattern::CommandFailure } else { LedPattern::Idle });
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

/// Forwards a config change the service loop can't apply itself (the radar
/// channel belongs to the manager thread) onto the manager queue.
fn apply_radar_config_change(change: RadarConfigChange) {
    match change {
        RadarConfigChange::SystemMode(mode) => {
            let _ = MANAGER_QUEUE.push(ManagerMsg::SetMode(mode));
        }
    }
}

#[cfg(target_os = "espidf")]
fn own_ieee_addr() -> u64 {
    let mut mac = [0u8; 8];
    unsafe { esp_idf_svc::sys::esp_zb_get_long_address(mac.as_mut_ptr()) };
    u64::from_le_bytes(mac)
}

#[cfg(not(target_os = "espidf"))]
fn own_ieee_addr() -> u64 {
    0
}

#[cfg(target_os = "espidf")]
fn reset_button_now_ms() -> u32 {
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1_000) as u32
}

#[cfg(not(target_os = "espidf"))]
fn reset_button_now_ms() -> u32 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}
