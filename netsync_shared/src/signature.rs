//! Signatures: field sets pushed on a timer.

use std::any::Any;

use crate::{
    relevance::Scope,
    wire::{Field, Reader, WireError, Writer},
};

/// Who may push a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncRule {
    /// Server pushes to everyone relevant, the authority included; the
    /// authority pushes its own copy to the server.
    Round,
    /// Only the server pushes.
    Server,
    /// Server pushes to everyone relevant except the authority; the authority
    /// pushes to the server.
    Authority,
}

/// The synchronized data behind a signature.
pub trait SyncField: Send + 'static {
    fn write(&self, w: &mut Writer);
    fn read(&mut self, r: &mut Reader<'_>) -> Result<(), WireError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Field + Send + 'static> SyncField for T {
    fn write(&self, w: &mut Writer) {
        Field::write(self, w);
    }

    fn read(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        *self = <T as Field>::read(r)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Registration request for a signature.
pub struct SignatureDescriptor {
    pub id: u8,
    /// Pushes per second.
    pub rate: f32,
    pub rule: SyncRule,
    pub scope: Scope,
    pub field: Box<dyn SyncField>,
}

impl SignatureDescriptor {
    pub fn new(id: u8, rate: f32, rule: SyncRule, field: impl SyncField) -> Self {
        Self {
            id,
            rate,
            rule,
            scope: Scope::Everyone,
            field: Box::new(field),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// A registered signature and its schedule.
pub(crate) struct SignatureSlot {
    pub rule: SyncRule,
    pub scope: Scope,
    pub period_ms: u64,
    pub next_due: u64,
    /// Timestamp of the last applied inbound push.
    pub last: u32,
    pub field: Box<dyn SyncField>,
}

impl SignatureSlot {
    /// `None` for a rate that cannot be scheduled.
    pub fn new(desc: SignatureDescriptor) -> Option<Self> {
        if !desc.rate.is_finite() || desc.rate <= 0.0 {
            return None;
        }
        let period_ms = ((1000.0 / desc.rate).round() as u64).max(1);
        Some(Self {
            rule: desc.rule,
            scope: desc.scope,
            period_ms,
            next_due: 0,
            last: 0,
            field: desc.field,
        })
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_due
    }

    /// Next push one period from now; missed periods are not made up.
    pub fn post(&mut self, now_ms: u64) {
        self.next_due = now_ms + self.period_ms;
    }

    /// Applies an inbound push unless it is older than the last one applied.
    pub fn receive(&mut self, timestamp: u32, r: &mut Reader<'_>) -> Result<bool, WireError> {
        if timestamp < self.last {
            return Ok(false);
        }
        self.field.read(r)?;
        self.last = timestamp;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn slot(rate: f32) -> Option<SignatureSlot> {
        SignatureSlot::new(SignatureDescriptor::new(0, rate, SyncRule::Server, Vec3::ZERO))
    }

    #[test]
    fn rate_becomes_period() {
        assert_eq!(slot(20.0).unwrap().period_ms, 50);
        assert_eq!(slot(3.0).unwrap().period_ms, 333);
        assert!(slot(0.0).is_none());
        assert!(slot(f32::NAN).is_none());
    }

    #[test]
    fn post_skips_missed_periods() {
        let mut s = slot(10.0).unwrap();
        assert!(s.is_due(0));
        s.post(0);
        assert!(!s.is_due(99));
        assert!(s.is_due(100));
        s.post(350);
        assert_eq!(s.next_due, 450);
    }

    #[test]
    fn older_pushes_are_dropped() {
        let mut s = slot(10.0).unwrap();
        let mut w = Writer::new();
        w.write_vec3(Vec3::new(1.0, 0.0, 0.0));
        w.write_vec3(Vec3::new(2.0, 0.0, 0.0));
        w.write_vec3(Vec3::new(3.0, 0.0, 0.0));
        let bytes = w.freeze();
        let mut r = Reader::new(&bytes);

        assert!(s.receive(10, &mut r).unwrap());
        assert!(!s.receive(9, &mut r).unwrap());
        // Equal timestamps still apply.
        let mut r = Reader::new(&bytes[12..]);
        assert!(s.receive(10, &mut r).unwrap());
        let v = s.field.as_any().downcast_ref::<Vec3>().unwrap();
        assert_eq!(*v, Vec3::new(2.0, 0.0, 0.0));
    }
}
