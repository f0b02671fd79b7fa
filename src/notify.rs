use tracing::info;

use super::history::RideEvent;

/// Receives the events of each committed ride operation.
pub trait RideNotifier: Send + Sync {
    fn notify(&self, events: &[RideEvent]);
}

/// Writes events to the log. Delivery to riders is someone else's job.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl RideNotifier for TracingNotifier {
    fn notify(&self, events: &[RideEvent]) {
        for event in events {
            info!(ride_id = %event.ride_id, user_id = %event.user_id, "{}", event.describe());
        }
    }
}
