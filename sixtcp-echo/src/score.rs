use core::fmt;
use std::time::Duration;

/// The result of an echo run.
pub struct Score {
    /// Bytes that came back.
    pub(crate) data_len: usize,
    /// From the first send until the last byte came back.
    pub(crate) time: Duration,
    /// Datagrams the network handed to a host.
    pub(crate) delivered: usize,
    /// Datagrams the network lost.
    pub(crate) dropped: usize,
}

impl Score {
    fn elapsed_secs(&self) -> f32 {
        self.time.as_millis() as f32 / 1000.0
    }

    fn effective_rate(&self) -> f32 {
        (self.data_len as f32) / self.elapsed_secs().max(0.001)
    }

    fn loss_rate(&self) -> f32 {
        let total = self.delivered + self.dropped;
        if total == 0 {
            return 0.0;
        }
        self.dropped as f32 / total as f32
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Echoed:    {} bytes", self.data_len)?;
        writeln!(f, "Time:      {:.3} s", self.elapsed_secs())?;
        writeln!(f, "Rate:      {:.1} B/s", self.effective_rate())?;
        write!(f, "Datagrams: {} delivered, {} lost ({:.1}%)",
            self.delivered, self.dropped, self.loss_rate() * 100.0)
    }
}
