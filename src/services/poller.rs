use std::collections::HashSet;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::channels::{ChannelUid, Command, StateSink};
use crate::client::{ClientError, Endpoint, VehicleApi};
use crate::handler::{CommandOutcome, VehicleChannelHandler};

/// Endpoints that some vehicles do not offer; a 403 or 404 stops polling them.
const OPTIONAL_ENDPOINTS: [Endpoint; 3] = [Endpoint::LastTrip, Endpoint::AllTrips, Endpoint::Destinations];

pub struct Poller<A: VehicleApi> {
    api: A,
    handler: VehicleChannelHandler,
    unsupported: HashSet<Endpoint>,
}

impl<A: VehicleApi> Poller<A> {
    pub fn new(api: A, handler: VehicleChannelHandler) -> Self {
        Self {
            api,
            handler,
            unsupported: HashSet::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn handler(&self) -> &VehicleChannelHandler {
        &self.handler
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = vec![Endpoint::Status];
        endpoints.extend(OPTIONAL_ENDPOINTS.into_iter().filter(|e| !self.unsupported.contains(e)));
        if self.handler.capabilities().is_electric {
            endpoints.push(Endpoint::ChargeProfile);
        }
        endpoints
    }

    /// Fetch every endpoint due this cycle. Failures are logged and retried next cycle.
    pub fn poll_once(&mut self, sink: &mut dyn StateSink) {
        for endpoint in self.endpoints() {
            self.poll(endpoint, sink);
        }
    }

    fn poll(&mut self, endpoint: Endpoint, sink: &mut dyn StateSink) {
        match self.api.fetch(endpoint) {
            Ok(body) => {
                debug!("{} answered with {} bytes", endpoint, body.len());
                if let Err(e) = self.handler.on_response(endpoint, &body, sink) {
                    warn!("Could not decode {} response: {}", endpoint, e);
                }
            }
            Err(e) => {
                warn!("Request for {} failed: {}", endpoint, e);
                self.handler.on_error(endpoint, &e);
                if OPTIONAL_ENDPOINTS.contains(&endpoint) && is_unsupported(&e) {
                    info!("Vehicle does not support {}; no longer polling it", endpoint);
                    self.unsupported.insert(endpoint);
                }
            }
        }
    }

    /// Apply one channel command; a profile send goes straight to the vehicle.
    pub fn apply(&mut self, channel: &ChannelUid, command: &Command, sink: &mut dyn StateSink) {
        match self.handler.handle_command(channel, command, sink) {
            Ok(CommandOutcome::Applied) => debug!("Applied {:?} to {}", command, channel),
            Ok(CommandOutcome::SendChargeProfile(payload)) => match self.api.send_charge_profile(&payload) {
                Ok(()) => info!("Charge profile sent to vehicle"),
                Err(e) => warn!("Sending charge profile failed: {}", e),
            },
            Err(e) => warn!("Command {:?} on {} rejected: {}", command, channel, e),
        }
    }

    /// Apply incoming commands until `deadline`. Sleeps out the rest once the sender is gone.
    fn serve_commands_until(
        &mut self,
        deadline: Instant,
        commands: &Receiver<(ChannelUid, Command)>,
        sink: &mut dyn StateSink,
    ) {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match commands.recv_timeout(remaining) {
                Ok((channel, command)) => self.apply(&channel, &command, sink),
                Err(RecvTimeoutError::Timeout) => return,
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(remaining);
                    return;
                }
            }
        }
    }

    pub fn run_loop(
        &mut self,
        interval: Duration,
        commands: &Receiver<(ChannelUid, Command)>,
        sink: &mut dyn StateSink,
    ) -> Result<(), String> {
        loop {
            let tick_start = Instant::now();
            self.poll_once(sink);

            // Maintain steady cadence
            self.serve_commands_until(tick_start + interval, commands, sink);
        }
    }
}

/// The vehicle refused the resource rather than failing to serve it.
pub fn is_unsupported(error: &ClientError) -> bool {
    matches!(error.status(), Some(403 | 404))
}
