use crate::renderer::config::MAX_FRAMES_IN_FLIGHT;
use crate::renderer::contexts::frame_ctx::deletion::DeletionTasks;
use crate::renderer::error::CoreError;

/// Per-frame timing and ring slot information, supplied by the application each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub time: f64,
    pub delta_time: f32,
    pub swapchain_image_index: u32,
    frame_ring_index: usize,
}

impl FrameContext {
    pub fn new(
        time: f64,
        delta_time: f32,
        frame_ring_index: usize,
        swapchain_image_index: u32,
    ) -> Result<Self, CoreError> {
        if frame_ring_index >= MAX_FRAMES_IN_FLIGHT {
            return Err(CoreError::FrameRingIndexOutOfRange {
                index: frame_ring_index,
                max: MAX_FRAMES_IN_FLIGHT,
            });
        }

        Ok(Self {
            time,
            delta_time,
            swapchain_image_index,
            frame_ring_index,
        })
    }

    /// Always in `[0, MAX_FRAMES_IN_FLIGHT)`.
    pub fn frame_ring_index(&self) -> usize {
        self.frame_ring_index
    }
}

/// Exactly `MAX_FRAMES_IN_FLIGHT` replicas of a per-frame mutable resource.
///
/// Replicas are only reachable through a [`FrameContext`], never a raw counter.
pub struct FrameRing<T> {
    replicas: [T; MAX_FRAMES_IN_FLIGHT],
}

impl<T> FrameRing<T> {
    pub fn new(create: impl FnMut(usize) -> T) -> Self {
        Self {
            replicas: std::array::from_fn(create),
        }
    }

    pub fn try_new<E>(mut create: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let mut replicas = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for ring_index in 0..MAX_FRAMES_IN_FLIGHT {
            replicas.push(create(ring_index)?);
        }
        let replicas: [T; MAX_FRAMES_IN_FLIGHT] = replicas
            .try_into()
            .unwrap_or_else(|_| unreachable!("one replica is pushed per ring slot"));

        Ok(Self { replicas })
    }

    pub fn get(&self, frame: &FrameContext) -> &T {
        &self.replicas[frame.frame_ring_index()]
    }

    pub fn get_mut(&mut self, frame: &FrameContext) -> &mut T {
        &mut self.replicas[frame.frame_ring_index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.replicas.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.replicas.iter_mut()
    }

    pub const fn len(&self) -> usize {
        MAX_FRAMES_IN_FLIGHT
    }

    pub fn into_replicas(self) -> [T; MAX_FRAMES_IN_FLIGHT] {
        self.replicas
    }

    /// Drops every replica once `frame`'s ring slot comes around again.
    pub fn retire(self, deletion_tasks: &mut DeletionTasks, frame: &FrameContext)
    where
        T: 'static,
    {
        deletion_tasks.retire(self, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ring_index: usize) -> FrameContext {
        FrameContext::new(0.0, 0.016, ring_index, 0).unwrap()
    }

    #[test]
    fn frame_context_rejects_out_of_range_ring_index() {
        let err = FrameContext::new(0.0, 0.0, MAX_FRAMES_IN_FLIGHT, 0).unwrap_err();
        assert_eq!(
            err,
            CoreError::FrameRingIndexOutOfRange {
                index: MAX_FRAMES_IN_FLIGHT,
                max: MAX_FRAMES_IN_FLIGHT,
            }
        );
    }

    #[test]
    fn ring_selects_replica_by_frame_context() {
        let mut ring = FrameRing::new(|i| i * 10);
        assert_eq!(ring.len(), MAX_FRAMES_IN_FLIGHT);
        assert_eq!(*ring.get(&frame(1)), 10);

        *ring.get_mut(&frame(2)) += 1;
        assert_eq!(*ring.get(&frame(2)), 21);
        assert_eq!(*ring.get(&frame(0)), 0);
    }

    #[test]
    fn retired_ring_keeps_every_replica_until_its_slot_returns() {
        let shared = std::rc::Rc::new(());
        let ring = FrameRing::new(|_| shared.clone());
        let mut deletion_tasks = DeletionTasks::new();

        ring.retire(&mut deletion_tasks, &frame(2));
        deletion_tasks.tick(&frame(0));
        deletion_tasks.tick(&frame(1));
        assert_eq!(std::rc::Rc::strong_count(&shared), MAX_FRAMES_IN_FLIGHT + 1);

        deletion_tasks.tick(&frame(2));
        assert_eq!(std::rc::Rc::strong_count(&shared), 1);
    }

    #[test]
    fn try_new_stops_at_first_failure() {
        let mut created = 0;
        let result: Result<FrameRing<u32>, &str> = FrameRing::try_new(|i| {
            if i == 1 {
                return Err("out of memory");
            }
            created += 1;
            Ok(i as u32)
        });

        assert_eq!(result.err(), Some("out of memory"));
        assert_eq!(created, 1);
    }
}
