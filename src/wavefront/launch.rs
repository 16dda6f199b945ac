use crate::device::LaunchGeometry;

/// Size a queue-driven launch for `queue_length` pending entries.
///
/// Returns `None` when there is nothing to do. Below one warp the whole queue
/// runs as a single group; otherwise the launch is rounded down to whole warps
/// and the remainder waits for the next iteration.
pub fn size_launch(queue_length: u32, warp_size: u32) -> Option<LaunchGeometry> {
    let warp_size = warp_size.max(1);
    match queue_length {
        0 => None,
        n if n < warp_size => Some(LaunchGeometry {
            work_items: n,
            local_size: n,
        }),
        n => Some(LaunchGeometry {
            work_items: n / warp_size * warp_size,
            local_size: warp_size,
        }),
    }
}

impl LaunchGeometry {
    /// Launch over all `items`, grouped by the largest divisor not above `warp_size`.
    pub fn covering(items: u32, warp_size: u32) -> Option<Self> {
        if items == 0 {
            return None;
        }
        let local_size = (1..=warp_size.clamp(1, items))
            .rev()
            .find(|d| items % d == 0)
            .unwrap_or(1);
        Some(Self {
            work_items: items,
            local_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(work_items: u32, local_size: u32) -> Option<LaunchGeometry> {
        Some(LaunchGeometry { work_items, local_size })
    }

    #[test]
    fn empty_queue_skips() {
        assert_eq!(size_launch(0, 32), None);
    }

    #[test]
    fn short_queue_runs_as_one_group() {
        assert_eq!(size_launch(5, 32), geometry(5, 5));
        assert_eq!(size_launch(31, 32), geometry(31, 31));
    }

    #[test]
    fn long_queue_rounds_down_to_whole_warps() {
        assert_eq!(size_launch(70, 32), geometry(64, 32));
        assert_eq!(size_launch(64, 32), geometry(64, 32));
        assert_eq!(size_launch(16, 1), geometry(16, 1));
    }

    #[test]
    fn sized_launches_never_exceed_the_queue() {
        for warp in 1..=40 {
            for n in 0..200 {
                match size_launch(n, warp) {
                    None => assert_eq!(n, 0),
                    Some(g) => {
                        assert!(g.work_items <= n);
                        assert!(n - g.work_items < warp);
                        assert_eq!(g.work_items % g.local_size, 0);
                    }
                }
            }
        }
    }

    #[test]
    fn covering_picks_a_dividing_local_size() {
        assert_eq!(LaunchGeometry::covering(16, 32), geometry(16, 16));
        assert_eq!(LaunchGeometry::covering(640 * 480, 32), geometry(640 * 480, 32));
        assert_eq!(LaunchGeometry::covering(15, 4), geometry(15, 3));
        assert_eq!(LaunchGeometry::covering(7, 32), geometry(7, 7));
        assert_eq!(LaunchGeometry::covering(0, 32), None);
    }
}
