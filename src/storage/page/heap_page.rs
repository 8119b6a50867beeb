use std::sync::Arc;

use bytes::BufMut;

use crate::common::{PageId, QuarryError, RecordId, Result, TransactionId, PAGE_SIZE};
use crate::tuple::{Schema, Tuple};

use super::Page;

/// Heap page layout:
///
/// +------------------+
/// | Header bitmap    |  ceil(num_slots / 8) bytes, bit i set = slot i used
/// +------------------+
/// | [slot 0]         |  tuple_size bytes each
/// | [slot 1]         |
/// | ...              |
/// +------------------+
/// | Zero padding     |
/// +------------------+
///
/// Bits are LSB-first within each header byte. Unused slots are written as
/// zeros, so an all-zero buffer is a valid empty page.
pub struct HeapPage {
    /// Identity of this page
    pid: PageId,
    /// Schema every tuple on this page follows
    schema: Arc<Schema>,
    /// Slot occupancy bitmap
    header: Vec<u8>,
    /// Decoded tuples, None for free slots
    slots: Vec<Option<Tuple>>,
    /// Transaction that last dirtied the page, if unflushed
    dirtied_by: Option<TransactionId>,
    /// Bytes of the page as of fault-in or the last commit
    before_image: Box<[u8]>,
}

impl HeapPage {
    /// Decodes a page from its on-disk bytes.
    /// Fails with `CorruptedPage` unless the buffer is exactly PAGE_SIZE bytes.
    pub fn new(pid: PageId, data: &[u8], schema: Arc<Schema>) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(QuarryError::CorruptedPage(pid));
        }

        let num_slots = Self::slots_per_page(&schema);
        let header_size = Self::header_size(num_slots);
        let tuple_size = schema.tuple_size();
        let header = data[..header_size].to_vec();

        let mut slots = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) == 0 {
                slots.push(None);
                continue;
            }
            let start = header_size + slot * tuple_size;
            let mut tuple = Tuple::from_bytes(schema.clone(), &data[start..start + tuple_size])
                .ok_or(QuarryError::CorruptedPage(pid))?;
            tuple.set_record_id(Some(RecordId::new(pid, slot as u16)));
            slots.push(Some(tuple));
        }

        Ok(Self {
            pid,
            schema,
            header,
            slots,
            dirtied_by: None,
            before_image: data.into(),
        })
    }

    /// Creates an empty page with the given identity.
    pub fn empty(pid: PageId, schema: Arc<Schema>) -> Self {
        let num_slots = Self::slots_per_page(&schema);
        Self {
            pid,
            schema,
            header: vec![0; Self::header_size(num_slots)],
            slots: vec![None; num_slots],
            dirtied_by: None,
            before_image: Self::empty_page_data().into_boxed_slice(),
        }
    }

    /// Bytes of a page holding no tuples.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; PAGE_SIZE]
    }

    /// Number of tuples of the schema that fit on one page, accounting for
    /// one header bit per tuple.
    pub fn slots_per_page(schema: &Schema) -> usize {
        (PAGE_SIZE * 8) / (schema.tuple_size() * 8 + 1)
    }

    fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Returns the schema of the tuples on this page.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the number of slots on this page.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of free slots on this page.
    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots()).filter(|&i| !self.is_slot_used(i)).count()
    }

    /// Returns whether the given slot holds a tuple.
    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// Stores the tuple in the first free slot and stamps its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<RecordId> {
        if **tuple.schema() != *self.schema {
            return Err(QuarryError::SchemaMismatch);
        }
        if tuple.to_bytes().is_none() {
            return Err(QuarryError::ValueEncoding(self.schema.to_string()));
        }

        let slot = (0..self.num_slots())
            .find(|&i| !self.is_slot_used(i))
            .ok_or(QuarryError::PageFull(self.pid))?;

        let rid = RecordId::new(self.pid, slot as u16);
        tuple.set_record_id(Some(rid));
        self.set_slot_used(slot, true);
        self.slots[slot] = Some(tuple.clone());
        Ok(rid)
    }

    /// Frees the slot named by the tuple's record id.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(QuarryError::MissingRecordId)?;
        if rid.page_id != self.pid {
            return Err(QuarryError::TupleNotOnPage {
                record: rid,
                page: self.pid,
            });
        }
        let slot = rid.slot as usize;
        if slot >= self.num_slots() {
            return Err(QuarryError::InvalidSlot {
                page: self.pid,
                slot: rid.slot,
            });
        }
        if !self.is_slot_used(slot) {
            return Err(QuarryError::EmptySlot(rid));
        }

        self.set_slot_used(slot, false);
        self.slots[slot] = None;
        Ok(())
    }

    /// Returns the tuple stored in the given slot.
    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Iterates over stored tuples in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.slots.iter().flatten()
    }
}

impl Page for HeapPage {
    fn id(&self) -> PageId {
        self.pid
    }

    fn page_data(&self) -> Vec<u8> {
        let tuple_size = self.schema.tuple_size();
        let mut data = Vec::with_capacity(PAGE_SIZE);
        data.put_slice(&self.header);
        for slot in &self.slots {
            match slot.as_ref().and_then(Tuple::to_bytes) {
                Some(bytes) => data.put_slice(&bytes),
                None => data.put_bytes(0, tuple_size),
            }
        }
        data.resize(PAGE_SIZE, 0);
        data
    }

    fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    fn before_image(&self) -> Result<Self> {
        HeapPage::new(self.pid, &self.before_image, self.schema.clone())
    }

    fn set_before_image(&mut self) {
        self.before_image = self.page_data().into_boxed_slice();
    }
}

impl std::fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("pid", &self.pid)
            .field("used", &(self.num_slots() - self.num_empty_slots()))
            .field("slots", &self.num_slots())
            .field("dirtied_by", &self.dirtied_by)
            .finish()
    }
}
