//! Descriptors owned by an open mlog handle.
//!
//! A [`PoolDescriptor`] binds the handle to its pool's command channel; a
//! [`LogDescriptor`] carries the object-side state every reader and writer
//! of one mlog must agree on: generation, read cursor, cached length and
//! compaction bookkeeping. Exactly one pair exists per open mlog.

use std::sync::Arc;

use mpool_ioctl::{Command, CommandChannel, Record, RecordKind};
use mpool_types::{MlogId, MlogOpenFlags, MlogPropsEx};

use crate::error::{MpoolError, MpoolResult};

/// Pool-side descriptor of an mlog handle.
pub(crate) struct PoolDescriptor {
    pool_name: Arc<str>,
    channel: Arc<dyn CommandChannel>,
}

impl PoolDescriptor {
    pub(crate) fn new(pool_name: Arc<str>, channel: Arc<dyn CommandChannel>) -> Self {
        Self { pool_name, channel }
    }

    pub(crate) fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub(crate) fn exchange(&self, command: Command) -> MpoolResult<mpool_ioctl::Reply> {
        self.channel.exchange(command).map_err(MpoolError::from)
    }
}

/// Object-side descriptor of an mlog handle.
#[derive(Debug)]
pub(crate) struct LogDescriptor {
    id: MlogId,
    gen: u64,
    opened: bool,
    compact_sem: bool,
    /// Index of the next record to read.
    cursor: u64,
    record_count: u64,
    data_len: u64,
    /// Index of a compaction start not yet matched by an end.
    open_compaction: Option<u64>,
}

impl LogDescriptor {
    pub(crate) fn new(props: &MlogPropsEx) -> Self {
        Self {
            id: props.props.id,
            gen: props.props.gen,
            opened: false,
            compact_sem: false,
            cursor: 0,
            record_count: props.record_count,
            data_len: props.data_len,
            open_compaction: None,
        }
    }

    /// Open the log for I/O and return its generation.
    ///
    /// Opening an already open descriptor only reports the generation.
    pub(crate) fn open(&mut self, pd: &PoolDescriptor, flags: MlogOpenFlags) -> MpoolResult<u64> {
        self.compact_sem = flags.contains(MlogOpenFlags::COMPACT_SEM);
        if self.opened {
            return Ok(self.gen);
        }

        let ex = pd
            .exchange(Command::MlogOpen { id: self.id, flags })?
            .into_mlog_ex("MlogOpen")?;
        self.gen = ex.props.gen;
        self.record_count = ex.record_count;
        self.data_len = ex.data_len;
        self.cursor = 0;
        self.open_compaction = self.scan_compaction(pd)?;
        self.opened = true;
        Ok(self.gen)
    }

    /// Find a trailing compaction start that has no matching end.
    fn scan_compaction(&self, pd: &PoolDescriptor) -> MpoolResult<Option<u64>> {
        let mut open = None;
        for index in 0..self.record_count {
            match self.fetch(pd, index)? {
                Some(Record {
                    kind: RecordKind::CompactStart,
                    ..
                }) => open = Some(index),
                Some(Record {
                    kind: RecordKind::CompactEnd,
                    ..
                }) => open = None,
                Some(_) => {}
                None => break,
            }
        }
        Ok(open)
    }

    pub(crate) fn close(&mut self, pd: &PoolDescriptor) -> MpoolResult<()> {
        if !self.opened {
            return Ok(());
        }
        self.opened = false;
        pd.exchange(Command::MlogClose { id: self.id })?
            .into_done("MlogClose")
            .map_err(MpoolError::from)
    }

    fn fetch(&self, pd: &PoolDescriptor, index: u64) -> MpoolResult<Option<Record>> {
        Ok(pd
            .exchange(Command::MlogReadRecord { id: self.id, index })?
            .into_record("MlogReadRecord")?)
    }

    fn push(
        &mut self,
        pd: &PoolDescriptor,
        kind: RecordKind,
        data: Vec<u8>,
        sync: bool,
    ) -> MpoolResult<()> {
        let len = data.len() as u64;
        pd.exchange(Command::MlogAppend {
            id: self.id,
            kind,
            data,
            sync,
        })?
        .into_done("MlogAppend")?;

        match kind {
            RecordKind::Data => self.data_len += len,
            RecordKind::CompactStart => self.open_compaction = Some(self.record_count),
            RecordKind::CompactEnd => self.open_compaction = None,
        }
        self.record_count += 1;
        Ok(())
    }

    /// Append one data record gathered from `iov`.
    pub(crate) fn append(
        &mut self,
        pd: &PoolDescriptor,
        iov: &[&[u8]],
        sync: bool,
    ) -> MpoolResult<()> {
        let data = iov.concat();
        self.push(pd, RecordKind::Data, data, sync)
    }

    pub(crate) fn append_marker(&mut self, pd: &PoolDescriptor, kind: RecordKind) -> MpoolResult<()> {
        if kind == RecordKind::CompactEnd && self.open_compaction.is_none() {
            return Err(MpoolError::InvalidArgument(
                "compaction end without a compaction start".into(),
            ));
        }
        self.push(pd, kind, Vec::new(), true)
    }

    /// First record index readers must not see.
    fn visible_limit(&self) -> u64 {
        match (self.compact_sem, self.open_compaction) {
            (true, Some(start)) => start,
            _ => self.record_count,
        }
    }

    /// Position of the next visible data record and a copy of it.
    fn peek_data(&self, pd: &PoolDescriptor) -> MpoolResult<Option<(u64, Vec<u8>)>> {
        let limit = self.visible_limit();
        let mut index = self.cursor;
        while index < limit {
            match self.fetch(pd, index)? {
                Some(Record {
                    kind: RecordKind::Data,
                    data,
                }) => return Ok(Some((index, data))),
                Some(_) => index += 1,
                None => break,
            }
        }
        Ok(None)
    }

    pub(crate) fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Copy the next data record into `buf`; `Ok(0)` at the end of the log.
    pub(crate) fn read_next(&mut self, pd: &PoolDescriptor, buf: &mut [u8]) -> MpoolResult<usize> {
        let Some((index, data)) = self.peek_data(pd)? else {
            return Ok(0);
        };
        if buf.len() < data.len() {
            return Err(MpoolError::BufferTooSmall { needed: data.len() });
        }
        buf[..data.len()].copy_from_slice(&data);
        self.cursor = index + 1;
        Ok(data.len())
    }

    /// Skip `skip` bytes of record data, then read the next record.
    ///
    /// `skip` must end on a record boundary.
    pub(crate) fn seek_read(
        &mut self,
        pd: &PoolDescriptor,
        mut skip: u64,
        buf: &mut [u8],
    ) -> MpoolResult<usize> {
        let start = self.cursor;
        while skip > 0 {
            let Some((index, data)) = self.peek_data(pd)? else {
                self.cursor = start;
                return Err(MpoolError::InvalidArgument(format!(
                    "seek past the end of mlog {}",
                    self.id
                )));
            };
            let len = data.len() as u64;
            if len > skip {
                self.cursor = start;
                return Err(MpoolError::InvalidArgument(format!(
                    "seek ends inside a record of mlog {}",
                    self.id
                )));
            }
            skip -= len;
            self.cursor = index + 1;
        }
        match self.read_next(pd, buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.cursor = start;
                Err(e)
            }
        }
    }

    pub(crate) fn flush(&self, pd: &PoolDescriptor) -> MpoolResult<()> {
        pd.exchange(Command::MlogFlush { id: self.id })?
            .into_done("MlogFlush")
            .map_err(MpoolError::from)
    }

    /// Bytes of data records in the log.
    pub(crate) fn len(&self) -> u64 {
        self.data_len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub(crate) fn gen(&self) -> u64 {
        self.gen
    }

    /// Forget cached contents after the log was erased underneath us.
    pub(crate) fn stat_reinit(&mut self) {
        self.cursor = 0;
        self.record_count = 0;
        self.data_len = 0;
        self.open_compaction = None;
    }

    pub(crate) fn set_gen(&mut self, gen: u64) {
        self.gen = gen;
    }
}
