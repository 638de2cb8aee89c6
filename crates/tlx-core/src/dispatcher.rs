//! Routes serialized payloads to the network output, or to disk when the
//! policy suspends the network or the network queue is saturated.

use std::time::Instant;

use tlx_common::Transmission;
use tracing::debug;

use crate::delivery::Delivery;
use crate::output::{ActiveDiskOutput, ActiveNetworkOutput};
use crate::policy::PolicyView;

pub trait TransmissionDispatcher: Send + Sync {
    fn dispatch(&self, transmission: Transmission) {
        self.dispatch_delivery(Delivery::live(transmission));
    }

    fn dispatch_delivery(&self, delivery: Delivery);
}

pub struct PolicyDispatcher {
    policy: PolicyView,
    network: ActiveNetworkOutput,
    disk: ActiveDiskOutput,
}

impl PolicyDispatcher {
    pub fn new(policy: PolicyView, network: ActiveNetworkOutput, disk: ActiveDiskOutput) -> Self {
        PolicyDispatcher {
            policy,
            network,
            disk,
        }
    }

    /// Drain the network output, then the disk output. Payloads the network
    /// workers divert while draining still reach the disk queue.
    pub fn shutdown(&self, deadline: Instant) -> bool {
        let network = self.network.shutdown(deadline);
        let disk = self.disk.shutdown(deadline);
        network && disk
    }
}

impl TransmissionDispatcher for PolicyDispatcher {
    fn dispatch_delivery(&self, delivery: Delivery) {
        if !self.policy.permits_network() {
            debug!(
                transmission_id = %delivery.transmission.id().short(),
                policy = %self.policy.current(),
                "network suspended, routing to disk"
            );
            self.disk.submit(delivery);
            return;
        }
        if let Err(delivery) = self.network.submit(delivery) {
            debug!(
                transmission_id = %delivery.transmission.id().short(),
                "network queue saturated, routing to disk"
            );
            self.disk.submit(delivery);
        }
    }
}
