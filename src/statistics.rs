use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// The type of information passed into the statistics instance.
#[derive(Debug, Clone, Copy)]
pub enum Stats {
    ReceivedBytes(usize),
    SendBytes(usize),
    ReceivedPkts(usize),
    SendPkts(usize),
}

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Traffic totals for the whole process.
#[derive(Default)]
pub struct Counts<T> {
    pub received_bytes: T,
    pub send_bytes: T,
    pub received_pkts: T,
    pub send_pkts: T,
}

impl<T: Number> Counts<T> {
    /// # Example
    ///
    /// ```
    /// use relay_server::statistics::*;
    ///
    /// let counts = Counts {
    ///     received_bytes: Count::default(),
    ///     send_bytes: Count::default(),
    ///     received_pkts: Count::default(),
    ///     send_pkts: Count::default(),
    /// };
    ///
    /// counts.add(&Stats::ReceivedBytes(100));
    /// assert_eq!(counts.received_bytes.get(), 100);
    ///
    /// counts.add(&Stats::SendPkts(1));
    /// assert_eq!(counts.send_pkts.get(), 1);
    /// ```
    pub fn add(&self, payload: &Stats) {
        match payload {
            Stats::ReceivedBytes(v) => self.received_bytes.add(*v),
            Stats::ReceivedPkts(v) => self.received_pkts.add(*v),
            Stats::SendBytes(v) => self.send_bytes.add(*v),
            Stats::SendPkts(v) => self.send_pkts.add(*v),
        }
    }
}

/// Shared statistics handle, updated by the datagram loop on receive
/// and by the socket sender on send.
///
/// # Example
///
/// ```
/// use relay_server::statistics::*;
///
/// let statistics = Statistics::default();
/// statistics.add(&[Stats::ReceivedBytes(256), Stats::ReceivedPkts(1)]);
///
/// let counts = statistics.snapshot();
/// assert_eq!(counts.received_bytes, 256);
/// assert_eq!(counts.received_pkts, 1);
/// assert_eq!(counts.send_pkts, 0);
/// ```
#[derive(Clone, Default)]
pub struct Statistics(Arc<Counts<Count>>);

impl Statistics {
    pub fn add(&self, reports: &[Stats]) {
        for report in reports {
            self.0.add(report);
        }
    }

    pub fn snapshot(&self) -> Counts<usize> {
        Counts {
            received_bytes: self.0.received_bytes.get(),
            received_pkts: self.0.received_pkts.get(),
            send_bytes: self.0.send_bytes.get(),
            send_pkts: self.0.send_pkts.get(),
        }
    }
}
