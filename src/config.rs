use std::time::Duration;

/// Operation family, used to select a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationFamily {
    EnableDisable,
    Discoverable,
    Scan,
    Tethering,
    PairUnpair,
    ConnectProfile,
    Sco,
    ConnectProxy,
    GetUnreadMessage,
    SetMessageStatus,
}

/// Timeouts and poll interval of a conformance session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WaitConfig {
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub enable_disable: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub discoverable: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub scan: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub tethering: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub pair_unpair: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub connect_profile: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub sco: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub connect_proxy: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub get_unread_message: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub set_message_status: Duration,
    /// Interval between state samples.
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            enable_disable: Duration::from_millis(20_000),
            discoverable: Duration::from_millis(5_000),
            scan: Duration::from_millis(5_000),
            tethering: Duration::from_millis(5_000),
            pair_unpair: Duration::from_millis(20_000),
            connect_profile: Duration::from_millis(20_000),
            sco: Duration::from_millis(10_000),
            connect_proxy: Duration::from_millis(5_000),
            get_unread_message: Duration::from_millis(10_000),
            set_message_status: Duration::from_millis(2_000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WaitConfig {
    /// Every timeout set to `timeout`, poll interval left at its default.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            enable_disable: timeout,
            discoverable: timeout,
            scan: timeout,
            tethering: timeout,
            pair_unpair: timeout,
            connect_profile: timeout,
            sco: timeout,
            connect_proxy: timeout,
            get_unread_message: timeout,
            set_message_status: timeout,
            ..Self::default()
        }
    }

    /// Timeout for operations of `family`.
    pub fn timeout(&self, family: OperationFamily) -> Duration {
        match family {
            OperationFamily::EnableDisable => self.enable_disable,
            OperationFamily::Discoverable => self.discoverable,
            OperationFamily::Scan => self.scan,
            OperationFamily::Tethering => self.tethering,
            OperationFamily::PairUnpair => self.pair_unpair,
            OperationFamily::ConnectProfile => self.connect_profile,
            OperationFamily::Sco => self.sco,
            OperationFamily::ConnectProxy => self.connect_proxy,
            OperationFamily::GetUnreadMessage => self.get_unread_message,
            OperationFamily::SetMessageStatus => self.set_message_status,
        }
    }

    /// Overrides the timeout of one family.
    pub fn with_timeout(mut self, family: OperationFamily, timeout: Duration) -> Self {
        let slot = match family {
            OperationFamily::EnableDisable => &mut self.enable_disable,
            OperationFamily::Discoverable => &mut self.discoverable,
            OperationFamily::Scan => &mut self.scan,
            OperationFamily::Tethering => &mut self.tethering,
            OperationFamily::PairUnpair => &mut self.pair_unpair,
            OperationFamily::ConnectProfile => &mut self.connect_profile,
            OperationFamily::Sco => &mut self.sco,
            OperationFamily::ConnectProxy => &mut self.connect_proxy,
            OperationFamily::GetUnreadMessage => &mut self.get_unread_message,
            OperationFamily::SetMessageStatus => &mut self.set_message_status,
        };
        *slot = timeout;
        self
    }

    /// Overrides the interval between state samples.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[cfg(feature = "serde")]
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Writes `d` as whole milliseconds.
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Reads a millisecond count.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
