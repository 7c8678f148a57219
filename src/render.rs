//! Table layout: one row per sensor, fixed column offsets.
//!
//! ```text
//! 0                   20                    42           55        65
//! A4:C1:38:AA:BB:CC   Kitchen               21.98 °      80.00%    12:30:05
//! ```

use crate::alias::AliasTable;
use crate::decoder::format_fixed;
use crate::display::{DisplayError, DisplaySink};
use crate::registry::DeviceRecord;
use log::debug;

pub const ADDRESS_COLUMN: u16 = 0;
pub const NAME_COLUMN: u16 = 20;
pub const TEMPERATURE_COLUMN: u16 = 42;
pub const HUMIDITY_COLUMN: u16 = 55;
pub const UPDATED_COLUMN: u16 = 65;

/// Width reserved for the last column (`HH:MM:SS`).
const UPDATED_WIDTH: u16 = 8;

/// Cell text for one record, in column order. Blank until the first update.
pub fn row_cells(record: &DeviceRecord, aliases: &AliasTable) -> [(u16, String); 5] {
    let label = aliases.resolve(record.name.as_deref().unwrap_or_default());

    let (temperature, humidity, updated) = match &record.sensors {
        Some(sensors) => (
            format!("{} \u{00b0}", format_fixed(sensors.reading.temperature_c)),
            format!("{}%", format_fixed(sensors.reading.humidity_pct)),
            sensors.updated_at.format("%H:%M:%S").to_string(),
        ),
        None => Default::default(),
    };

    [
        (ADDRESS_COLUMN, record.address.to_string()),
        (NAME_COLUMN, label.to_string()),
        (TEMPERATURE_COLUMN, temperature),
        (HUMIDITY_COLUMN, humidity),
        (UPDATED_COLUMN, updated),
    ]
}

/// Pad every cell out to the next column so a shorter value overwrites a longer one.
fn padded(cells: [(u16, String); 5]) -> impl Iterator<Item = (u16, String)> {
    let ends: Vec<u16> = cells
        .iter()
        .skip(1)
        .map(|(column, _)| *column)
        .chain([UPDATED_COLUMN + UPDATED_WIDTH])
        .collect();

    cells
        .into_iter()
        .zip(ends)
        .map(|((column, text), end)| {
            let width = usize::from(end - column);
            (column, format!("{text:<width$}"))
        })
}

fn write_row(
    sink: &mut dyn DisplaySink,
    row: u16,
    record: &DeviceRecord,
    aliases: &AliasTable,
) -> Result<(), DisplayError> {
    for (column, text) in padded(row_cells(record, aliases)) {
        sink.write_at(row, column, &text)?;
    }
    Ok(())
}

/// Draws frames, clearing the grid whenever its size changed since the last one.
#[derive(Debug, Default)]
pub struct Renderer {
    last_size: Option<(u16, u16)>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw one frame and flush it.
    ///
    /// A row that fails to draw (typically because the terminal shrank) is
    /// logged and skipped; the rest of the frame is still drawn.
    ///
    /// # Errors
    /// Only when the sink cannot report its size, clear or flush.
    pub fn render(
        &mut self,
        sink: &mut dyn DisplaySink,
        records: &[DeviceRecord],
        aliases: &AliasTable,
    ) -> Result<(), DisplayError> {
        let size = sink.size()?;
        if self.last_size.is_some_and(|last| last != size) {
            sink.clear()?;
        }
        self.last_size = Some(size);

        for (line, record) in records.iter().enumerate() {
            let Ok(row) = u16::try_from(line) else {
                break;
            };
            if let Err(e) = write_row(sink, row, record, aliases) {
                debug!("skipping row {row} ({}): {e}", record.address);
            }
        }

        sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::Alias;
    use crate::display::GridBuffer;
    use crate::registry::DeviceRegistry;
    use crate::test_utils::{OTHER_MAC, TEST_MAC, hms};

    fn kitchen() -> AliasTable {
        AliasTable::new(&[Alias {
            name: "GVH5075_ABCD".to_string(),
            alias: "Kitchen".to_string(),
        }])
    }

    fn registry() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.apply_sensor_update(TEST_MAC, Some("GVH5075_ABCD"), 219_800, 87, hms(12, 30, 5));
        registry.apply_sensor_update(OTHER_MAC, Some("GVH5075_9999"), 199_936, 50, hms(12, 30, 6));
        registry
    }

    #[test]
    fn renders_fixed_columns() {
        let mut grid = GridBuffer::new(24, 80);
        Renderer::new()
            .render(&mut grid, registry().snapshot(), &kitchen())
            .unwrap();

        let line = grid.line(0);
        assert_eq!(&line[..17], "A4:C1:38:AA:BB:CC");
        assert_eq!(line[20..].split_whitespace().next(), Some("Kitchen"));

        let chars: Vec<char> = line.chars().collect();
        let at = |col: u16, len: usize| chars[usize::from(col)..usize::from(col) + len].iter().collect::<String>();
        assert_eq!(at(TEMPERATURE_COLUMN, 7), "21.98 °");
        assert_eq!(at(HUMIDITY_COLUMN, 6), "80.00%");
        assert_eq!(at(UPDATED_COLUMN, 8), "12:30:05");
        assert_eq!(grid.flushes, 1);
    }

    #[test]
    fn unaliased_name_renders_raw() {
        let mut grid = GridBuffer::new(24, 80);
        Renderer::new()
            .render(&mut grid, registry().snapshot(), &kitchen())
            .unwrap();
        assert!(grid.line(1).contains("GVH5075_9999"));
        assert!(grid.line(1).contains("19.99 °"));
        assert!(grid.line(1).contains("93.60%"));
    }

    #[test]
    fn record_without_readings_shows_only_address() {
        let mut registry = DeviceRegistry::new();
        registry.apply_signal_strength(TEST_MAC, Some(-60));

        let mut grid = GridBuffer::new(24, 80);
        Renderer::new()
            .render(&mut grid, registry.snapshot(), &AliasTable::default())
            .unwrap();
        assert_eq!(grid.lines(), vec!["A4:C1:38:AA:BB:CC".to_string()]);
    }

    #[test]
    fn clears_only_after_resize() {
        let records = registry();
        let aliases = kitchen();
        let mut grid = GridBuffer::new(24, 80);
        let mut renderer = Renderer::new();

        renderer.render(&mut grid, records.snapshot(), &aliases).unwrap();
        renderer.render(&mut grid, records.snapshot(), &aliases).unwrap();
        assert_eq!(grid.clears, 0);

        grid.resize(30, 100);
        renderer.render(&mut grid, records.snapshot(), &aliases).unwrap();
        assert_eq!(grid.clears, 1);
        assert_eq!(grid.lines().len(), 2);
    }

    #[test]
    fn rows_beyond_grid_are_skipped() {
        let mut grid = GridBuffer::new(1, 80);
        Renderer::new()
            .render(&mut grid, registry().snapshot(), &kitchen())
            .unwrap();
        assert_eq!(grid.lines().len(), 1);
        assert_eq!(grid.flushes, 1);
    }

    #[test]
    fn narrow_grid_clips_instead_of_failing() {
        let mut grid = GridBuffer::new(5, 30);
        Renderer::new()
            .render(&mut grid, registry().snapshot(), &kitchen())
            .unwrap();
        assert_eq!(grid.line(0), "A4:C1:38:AA:BB:CC   Kitchen");
    }

    #[test]
    fn shorter_value_overwrites_longer_one() {
        let mut registry = DeviceRegistry::new();
        registry.apply_sensor_update(TEST_MAC, Some("GVH5075_LONGNAME"), 1, 1, hms(0, 0, 0));
        let mut grid = GridBuffer::new(5, 80);
        let mut renderer = Renderer::new();
        renderer.render(&mut grid, registry.snapshot(), &AliasTable::default()).unwrap();

        registry.apply_sensor_update(TEST_MAC, Some("GVH5075_A"), 1, 1, hms(0, 0, 0));
        renderer.render(&mut grid, registry.snapshot(), &AliasTable::default()).unwrap();
        assert_eq!(grid.line(0)[20..42].trim_end(), "GVH5075_A");
    }
}
