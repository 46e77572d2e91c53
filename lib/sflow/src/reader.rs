use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Buf;

use crate::Error;

/// Address type word values used by the datagram header and the router/gateway records.
pub const ADDRESS_TYPE_IPV4: u32 = 1;
pub const ADDRESS_TYPE_IPV6: u32 = 2;

/// Number of bytes needed to round `len` up to the next 4-byte boundary.
#[inline]
pub const fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// A bounds-checked big-endian cursor over a byte slice.
///
/// Every read either consumes exactly the requested number of bytes or
/// fails with [`Error::BufferUnderrun`] without moving the cursor.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<(), Error> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(Error::BufferUnderrun { needed, remaining });
        }

        Ok(())
    }

    /// Rejects a wire count whose smallest possible encoding would not fit
    /// in what is left, before anything is allocated for it.
    pub fn ensure_count(&self, count: u32, min_size: usize) -> Result<(), Error> {
        let remaining = self.remaining();
        match (count as usize).checked_mul(min_size) {
            Some(total) if total <= remaining => Ok(()),
            _ => Err(Error::MalformedCount {
                count,
                min_size,
                remaining,
            }),
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        self.ensure(n)?;

        let data = &self.buf[self.pos..self.pos + n];
        self.pos += n;

        Ok(data)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut data = [0u8; N];
        data.copy_from_slice(self.read_bytes(N)?);
        Ok(data)
    }

    pub fn peek_u32(&self) -> Result<u32, Error> {
        self.ensure(4)?;

        let mut chunk = &self.buf[self.pos..];
        Ok(chunk.get_u32())
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let value = self.peek_u32()?;
        self.pos += 4;

        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        self.ensure(8)?;

        let mut chunk = &self.buf[self.pos..];
        let value = chunk.get_u64();
        self.pos += 8;

        Ok(value)
    }

    /// Reads a 4 or 16 byte address selected by `address_type`.
    pub fn read_ip(&mut self, address_type: u32) -> Result<IpAddr, Error> {
        match address_type {
            ADDRESS_TYPE_IPV4 => self.read_ipv4().map(IpAddr::V4),
            ADDRESS_TYPE_IPV6 => self.read_ipv6().map(IpAddr::V6),
            _ => Err(Error::UnknownAddressType(address_type)),
        }
    }

    pub fn read_ipv4(&mut self) -> Result<Ipv4Addr, Error> {
        self.read_array::<4>().map(Ipv4Addr::from)
    }

    pub fn read_ipv6(&mut self) -> Result<Ipv6Addr, Error> {
        self.read_array::<16>().map(Ipv6Addr::from)
    }

    /// Reads an address type word followed by the address it selects.
    pub fn read_address(&mut self) -> Result<IpAddr, Error> {
        let start = self.pos;
        let address_type = self.read_u32()?;
        self.read_ip(address_type).inspect_err(|_| self.pos = start)
    }

    /// Reads a length-prefixed byte array and consumes its trailing padding.
    pub fn read_opaque(&mut self) -> Result<&'a [u8], Error> {
        let len = self.peek_u32()? as usize;
        let total = len
            .checked_add(padding(len))
            .and_then(|n| n.checked_add(4))
            .unwrap_or(usize::MAX);
        self.ensure(total)?;

        self.pos += 4;
        let data = &self.buf[self.pos..self.pos + len];
        self.pos += total - 4;

        Ok(data)
    }

    /// Reads a length-prefixed string. Invalid UTF-8 is replaced rather than rejected,
    /// agents are not consistent about the charset they put here.
    pub fn read_string(&mut self) -> Result<String, Error> {
        self.read_opaque()
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Consumes `len` bytes plus the padding that rounds them up to 4.
    pub fn skip_padded(&mut self, len: usize) -> Result<(), Error> {
        let total = len.checked_add(padding(len)).unwrap_or(usize::MAX);
        self.skip(total)
    }

    /// Splits off the next `n` bytes as an independent reader and advances
    /// past them.
    pub fn take(&mut self, n: usize) -> Result<Reader<'a>, Error> {
        self.read_bytes(n).map(Reader::new)
    }

    /// Verifies that a reader produced by [`Reader::take`] was fully consumed.
    pub fn finish(self) -> Result<(), Error> {
        if self.remaining() != 0 {
            return Err(Error::Desync {
                expected: self.buf.len(),
                consumed: self.pos,
            });
        }

        Ok(())
    }
}
