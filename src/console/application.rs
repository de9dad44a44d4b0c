use std::time::Duration;
use btleplug::platform::{Adapter, Manager};
use futures::channel::mpsc::{channel, Receiver};
use futures::future::pending;
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::console::controller::Controller;
use crate::console::types::{Command, HELP};
use crate::device::btle::BtleplugPlatform;
use crate::device::scan::ScanSession;
use crate::device::scanner::{find_adapters, scan_task};
use crate::device::types::{ConnectionState, PlatformEvent, ScanEvent};
use crate::error::{AppRunError, DeviceError};

fn print_results(scan: &ScanSession) {
    if scan.is_empty() {
        println!("No peripherals found");
        return;
    }

    for (index, peripheral) in scan.results().iter().enumerate() {
        println!("{:>3}. {}", index + 1, peripheral);
    }
}

struct Application {
    adapters: Vec<Adapter>,
    scan_duration: Duration,
    controller: Controller<BtleplugPlatform>,
    // events and cancellation of the running scan task, if any
    scan_events: Option<Receiver<ScanEvent>>,
    scan_cancel: Option<CancellationToken>,

    // last values shown to the user
    previous_state: ConnectionState,
    previous_count: u64,
}

impl Application {
    fn print_status(&self) {
        let connection = self.controller.connection();
        match connection.peripheral() {
            Some(peripheral) => println!("Peripheral:    {}", peripheral),
            None => println!("Peripheral:    none"),
        }
        println!("State:         {}", self.controller.state());
        println!("LEDs:          {}", self.controller.leds());
        println!("Notifications: {}", if connection.notifications_enabled() { "on" } else { "off" });
        println!("Counter:       {}", self.controller.notification_count());
        if self.controller.scan().is_active() {
            println!("Scanning:      {} peripheral(s) so far", self.controller.scan().len());
        }
    }

    // Print what changed since the last call.
    fn report_changes(&mut self) {
        let state = self.controller.state();
        if state != &self.previous_state {
            println!("Connection: {}", state);
            self.previous_state = state.clone();
        }

        let count = self.controller.notification_count();
        if count != self.previous_count {
            println!("Counter: {}", count);
            self.previous_count = count;
        }
    }

    fn start_scan(&mut self) {
        if let Err(err) = self.controller.start_scan() {
            println!("{}", err);
            return;
        }

        // a fresh channel per scan, so events of a cancelled scan never reach the next one
        let (sender, receiver) = channel::<ScanEvent>(256);
        let cancel = CancellationToken::new();
        scan_task(self.adapters.clone(), self.scan_duration, cancel.clone(), sender);
        self.scan_events = Some(receiver);
        self.scan_cancel = Some(cancel);
        println!("Scanning for {}...", humantime::format_duration(self.scan_duration));
    }

    fn stop_scan(&mut self) {
        if let Some(cancel) = self.scan_cancel.take() {
            cancel.cancel();
        }
        self.scan_events = None;
        if self.controller.scan().is_active() {
            self.controller.stop_scan();
            print_results(self.controller.scan());
        }
    }

    /// Returns false when the application should exit.
    fn execute(&mut self, command: Command) -> bool {
        debug!("Executing {:?}", command);

        let result = match command {
            Command::Scan => {
                self.start_scan();
                Ok(())
            },
            Command::Stop => {
                self.stop_scan();
                Ok(())
            },
            Command::List => {
                print_results(self.controller.scan());
                Ok(())
            },
            Command::Connect(target) => self.controller.connect(&target).map(|peripheral| {
                println!("Connecting to {}...", peripheral);
            }),
            Command::Led(index) => self.controller.toggle_led(index).map(|_| {
                println!("LEDs: {}", self.controller.leds());
            }),
            Command::Notify(enabled) => self.controller.set_notifications(enabled).map(|_| {
                println!("Notifications {}", if enabled { "on" } else { "off" });
            }),
            Command::Status => {
                self.print_status();
                Ok(())
            },
            Command::Disconnect => {
                self.controller.disconnect();
                Ok(())
            },
            Command::Help => {
                println!("{}", HELP);
                Ok(())
            },
            Command::Quit => return false,
        };

        if let Err(err) = result {
            println!("{}", err);
        }
        true
    }

    fn handle_device_event(&mut self, event: PlatformEvent) {
        if let Err(err) = self.controller.handle_device_event(event) {
            warn!("{}", err);
            println!("{}", err);
        }
    }

    fn handle_scan_event(&mut self, event: ScanEvent) {
        if let ScanEvent::Failed(message) = &event {
            println!("Scan failed: {}", message);
        }

        if self.controller.handle_scan_event(event) {
            self.scan_events = None;
            self.scan_cancel = None;
            print_results(self.controller.scan());
        }
    }

    fn shutdown(&mut self) {
        if let Some(cancel) = self.scan_cancel.take() {
            cancel.cancel();
        }
        self.scan_events = None;
        self.controller.disconnect();
    }
}

async fn next_scan_event(events: &mut Option<Receiver<ScanEvent>>) -> Option<ScanEvent> {
    match events {
        Some(events) => events.next().await,
        None => pending().await,
    }
}

/// Interactive console: reads commands from stdin until `quit` or end of input.
pub async fn run_console(config: Config) -> Result<(), AppRunError> {
    let manager = Manager::new().await.map_err(DeviceError::from)?;
    let adapters = find_adapters(&manager).await?;

    let (platform_sender, mut platform_events) = channel::<PlatformEvent>(64);

    let platform = BtleplugPlatform::new(adapters.clone(), platform_sender, &config);
    let mut app = Application {
        adapters,
        scan_duration: config.scan_duration(),
        controller: Controller::new(platform, config.gatt_layout),
        scan_events: None,
        scan_cancel: None,
        previous_state: ConnectionState::Disconnected,
        previous_count: 0,
    };

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    'mainloop: loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue 'mainloop;
                    }
                    match line.parse::<Command>() {
                        Ok(command) => {
                            if !app.execute(command) {
                                break 'mainloop;
                            }
                        },
                        Err(err) => println!("{}", err),
                    }
                },
                Ok(None) => break 'mainloop,
                Err(err) => {
                    error!("Failed to read from stdin: {}", err);
                    break 'mainloop;
                },
            },
            Some(event) = platform_events.next() => app.handle_device_event(event),
            Some(event) = next_scan_event(&mut app.scan_events) => app.handle_scan_event(event),
        }

        app.report_changes();
    }

    info!("Shutting down");
    app.shutdown();
    Ok(())
}

/// Scan once for `duration` and print the results.
pub async fn run_scan(duration: Duration) -> Result<(), AppRunError> {
    let manager = Manager::new().await.map_err(DeviceError::from)?;
    let adapters = find_adapters(&manager).await?;

    let (sender, mut events) = channel::<ScanEvent>(256);
    let mut scan = ScanSession::new();
    scan.start()?;

    println!("Scanning for {}...", humantime::format_duration(duration));
    let handle = scan_task(adapters, duration, CancellationToken::new(), sender);

    while let Some(event) = events.next().await {
        match event {
            ScanEvent::Sighting { identifier, address, name, rssi } => {
                scan.on_advertisement(&identifier, address, name, rssi)
            },
            ScanEvent::Finished => break,
            ScanEvent::Failed(message) => {
                println!("Scan failed: {}", message);
                break;
            },
        }
    }
    scan.stop();

    if let Err(err) = handle.await {
        warn!("Scan task did not finish cleanly: {}", err);
    }

    print_results(&scan);
    Ok(())
}
