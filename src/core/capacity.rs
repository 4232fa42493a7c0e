//! Sector rounding and the capacity bar

use crate::device::SECTOR_SIZE;

use super::MediaItem;

/// Number of sectors needed to hold `bytes`
pub fn sectors_for(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE)
}

/// Round a byte size up to the next sector boundary
pub fn round_to_sector(bytes: u64) -> u64 {
    sectors_for(bytes) * SECTOR_SIZE
}

/// Whether the selection fits on the media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityIndicator {
    InRange,
    OverCapacity,
}

/// Fill level of the media for the current selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityReport {
    pub total_image_bytes: u64,
    pub free_bytes: u64,
    /// Bar position, clamped to 0..=100
    pub percent: u8,
    pub indicator: CapacityIndicator,
}

impl CapacityReport {
    pub fn new(total_image_bytes: u64, free_bytes: u64) -> Self {
        let (percent, indicator) = if total_image_bytes == 0 {
            (0, CapacityIndicator::InRange)
        } else if free_bytes == 0 {
            (100, CapacityIndicator::OverCapacity)
        } else {
            let raw = u128::from(total_image_bytes) * 100 / u128::from(free_bytes);
            if raw > 100 {
                (100, CapacityIndicator::OverCapacity)
            } else {
                (raw as u8, CapacityIndicator::InRange)
            }
        };

        Self {
            total_image_bytes,
            free_bytes,
            percent,
            indicator,
        }
    }

    pub fn for_items(items: &[MediaItem], free_bytes: u64) -> Self {
        Self::new(total_image_size(items), free_bytes)
    }

    pub fn fits(&self) -> bool {
        self.indicator == CapacityIndicator::InRange
    }

    /// Free capacity as shown next to the bar
    pub fn free_text(&self) -> String {
        format_capacity(self.free_bytes)
    }
}

/// Sum of the sector-rounded sizes of all items
pub fn total_image_size(items: &[MediaItem]) -> u64 {
    items.iter().map(MediaItem::size_on_disc).sum()
}

/// Format a capacity in decimal units: "650MB" below a gigabyte, "4.70GB" above
pub fn format_capacity(bytes: u64) -> String {
    if bytes == 0 {
        "0MB".to_string()
    } else if bytes < 1_000_000_000 {
        format!("{}MB", bytes / 1_000_000)
    } else {
        format!("{:.2}GB", bytes as f64 / 1_000_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_sector() {
        assert_eq!(round_to_sector(0), 0);
        assert_eq!(round_to_sector(1), 2048);
        assert_eq!(round_to_sector(2048), 2048);
        assert_eq!(round_to_sector(2049), 4096);
        assert_eq!(round_to_sector(300_000_001), 300_001_280);
        assert_eq!(round_to_sector(50_000_000), 50_001_920);
        assert_eq!(round_to_sector(400_000_000), 400_001_024);
    }

    #[test]
    fn test_rounded_sizes_are_sector_multiples() {
        for bytes in [0u64, 1, 511, 2047, 2048, 4097, 123_456_789] {
            let rounded = round_to_sector(bytes);
            assert_eq!(rounded % SECTOR_SIZE, 0);
            assert!(rounded >= bytes);
            assert!(rounded - bytes < SECTOR_SIZE);
        }
    }

    #[test]
    fn test_capacity_scenario_crosses_over() {
        let free = 700_000_000;
        let two_items = round_to_sector(300_000_001) + round_to_sector(50_000_000);
        let report = CapacityReport::new(two_items, free);
        assert_eq!(report.percent, 50);
        assert_eq!(report.indicator, CapacityIndicator::InRange);
        assert!(report.fits());

        let three_items = two_items + round_to_sector(400_000_000);
        let report = CapacityReport::new(three_items, free);
        assert_eq!(report.percent, 100);
        assert_eq!(report.indicator, CapacityIndicator::OverCapacity);
        assert!(!report.fits());
    }

    #[test]
    fn test_capacity_exactly_full_is_in_range() {
        let report = CapacityReport::new(4096, 4096);
        assert_eq!(report.percent, 100);
        assert_eq!(report.indicator, CapacityIndicator::InRange);
    }

    #[test]
    fn test_capacity_empty_selection() {
        let report = CapacityReport::new(0, 0);
        assert_eq!(report.percent, 0);
        assert_eq!(report.indicator, CapacityIndicator::InRange);

        let report = CapacityReport::new(0, 700_000_000);
        assert_eq!(report.percent, 0);
    }

    #[test]
    fn test_capacity_without_media() {
        let report = CapacityReport::new(2048, 0);
        assert_eq!(report.percent, 100);
        assert_eq!(report.indicator, CapacityIndicator::OverCapacity);
    }

    #[test]
    fn test_format_capacity() {
        assert_eq!(format_capacity(0), "0MB");
        assert_eq!(format_capacity(736_966_656), "736MB");
        assert_eq!(format_capacity(4_700_372_992), "4.70GB");
        assert_eq!(format_capacity(1_000_000_000), "1.00GB");
    }
}
