//! Last-value-wins slot for the most recent training loss.
//!
//! The trainer publishes through [`LossReporter`] from a blocking thread;
//! the sampler reads through [`LossReader`]. Publishing never blocks and
//! never fails, and intermediate values may be overwritten before anyone
//! reads them.

use tokio::sync::watch;

/// Writer half, owned by the training unit.
#[derive(Debug)]
pub struct LossReporter {
    tx: watch::Sender<Option<f64>>,
}

/// Reader half, owned by the sampler.
#[derive(Debug, Clone)]
pub struct LossReader {
    rx: watch::Receiver<Option<f64>>,
}

pub fn loss_channel() -> (LossReporter, LossReader) {
    let (tx, rx) = watch::channel(None);
    (LossReporter { tx }, LossReader { rx })
}

impl LossReporter {
    /// Publish `loss`, replacing any unread value. Non-finite values are
    /// ignored so they never reach serialized samples.
    pub fn report(&self, loss: f64) {
        if loss.is_finite() {
            self.tx.send_replace(Some(loss));
        }
    }
}

impl LossReader {
    /// A reader that never sees a loss (ingestion-only runs, tests).
    pub fn detached() -> Self {
        loss_channel().1
    }

    pub fn latest(&self) -> Option<f64> {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sees_latest_value() {
        let (reporter, reader) = loss_channel();
        assert_eq!(reader.latest(), None);

        reporter.report(0.9);
        reporter.report(0.5);
        assert_eq!(reader.latest(), Some(0.5));
    }

    #[test]
    fn non_finite_loss_is_dropped() {
        let (reporter, reader) = loss_channel();
        reporter.report(0.25);
        reporter.report(f64::NAN);
        reporter.report(f64::INFINITY);
        assert_eq!(reader.latest(), Some(0.25));
    }

    #[test]
    fn report_survives_dropped_reader() {
        let (reporter, reader) = loss_channel();
        drop(reader);
        reporter.report(1.0);
    }

    #[test]
    fn detached_reader_is_empty() {
        assert_eq!(LossReader::detached().latest(), None);
    }
}
