use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use anyhow::anyhow;
use bytes::{Buf, BufMut};

/// The single wire protocol this transport speaks. Kept as a constant rather than a field of
///  [Address] - cross-protocol operation is not supported, and carrying the string in every
///  address would only add noise to maps and wire frames.
pub const PROTOCOL: &str = "udp";

/// The logical address of an actor system: its name plus the socket address its transport is
///  bound to. This is what user code refers to when it sends to a remote system, and it is
///  stable across restarts of that system.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Address {
    pub system: String,
    pub socket_addr: SocketAddr,
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system.hash(state);
        match self.socket_addr {
            SocketAddr::V4(s) => s.ip().to_bits().hash(state),
            SocketAddr::V6(s) => s.ip().to_bits().hash(state),
        };
        self.socket_addr.port().hash(state);
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}@{}", PROTOCOL, self.system, self.socket_addr)
    }
}

impl Address {
    pub fn new(system: impl Into<String>, socket_addr: SocketAddr) -> Address {
        Address {
            system: system.into(),
            socket_addr,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.system.len() as u16);
        buf.put_slice(self.system.as_bytes());
        match &self.socket_addr {
            SocketAddr::V4(data) => {
                buf.put_u8(4);
                buf.put_u32(data.ip().to_bits());
                buf.put_u16(data.port());
            }
            SocketAddr::V6(data) => {
                buf.put_u8(6);
                buf.put_u128(data.ip().to_bits());
                buf.put_u16(data.port());
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Address> {
        let system_len = buf.try_get_u16()? as usize;
        if buf.remaining() < system_len {
            return Err(anyhow!("truncated system name: {} < {} bytes", buf.remaining(), system_len));
        }
        let mut system_buf = vec![0u8; system_len];
        buf.copy_to_slice(&mut system_buf);
        let system = String::from_utf8(system_buf)
            .map_err(|_| anyhow!("system name is not valid utf-8"))?;

        let socket_addr = match buf.try_get_u8()? {
            4 => {
                let ip = buf.try_get_u32()?;
                let port = buf.try_get_u16()?;
                SocketAddr::V4(SocketAddrV4::new(ip.into(), port))
            }
            6 => {
                let ip = buf.try_get_u128()?;
                let port = buf.try_get_u16()?;
                SocketAddr::V6(SocketAddrV6::new(ip.into(), port, 0, 0))
            }
            n => {
                return Err(anyhow!("invalid socket address discriminator: {}", n));
            }
        };

        Ok(Address {
            system,
            socket_addr,
        })
    }
}

/// An [Address] plus the UID of one specific incarnation of the process behind it. The UID is
///  minted once per process start, so two incarnations at the same network address are
///  distinguishable - that is the foundation for quarantine and restart detection.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct UniqueAddress {
    pub address: Address,
    pub uid: u64,
}

impl Debug for UniqueAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}#{}]", self.address, self.uid)
    }
}

impl UniqueAddress {
    pub fn new(address: Address, uid: u64) -> UniqueAddress {
        UniqueAddress { address, uid }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        self.address.ser(buf);
        buf.put_u64(self.uid);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<UniqueAddress> {
        let address = Address::try_deser(buf)?;
        let uid = buf.try_get_u64()?;
        Ok(UniqueAddress { address, uid })
    }
}
