use tokio::sync::broadcast;

pub type ShutdownSender = broadcast::Sender<()>;
pub type ShutdownReceiver = broadcast::Receiver<()>;

const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;

pub fn channel() -> ShutdownSender {
    broadcast::channel(SHUTDOWN_CHANNEL_CAPACITY).0
}
