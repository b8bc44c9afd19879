//! Static track topology: sectors, crossings and the two travel cycles.
//!
//! A [`Track`] is built once at startup through a [`TrackBuilder`] and shared
//! by every train as `Arc<Track>`. The graph never changes afterwards; only
//! the ownership cells inside each [`Sector`] and [`Crossing`] mutate.
//!
//! # Example
//!
//! ```rust
//! use trainz_autopilot::track::{Color, SectorSpec, TrackBuilder, TravelDirection};
//!
//! let mut builder = TrackBuilder::new();
//! let station = builder.add_sector(SectorSpec::station("RED_1", Color::Red));
//! let green = builder.add_sector(SectorSpec::plain("GREEN", Color::Green));
//! builder.connect_cycle(TravelDirection::A, &[station, green]);
//! builder.connect_cycle(TravelDirection::B, &[station, green]);
//! let track = builder.build().unwrap();
//!
//! assert_eq!(track.next(station, TravelDirection::A), green);
//! assert_eq!(track.next(green, TravelDirection::B), station);
//! ```

use core::fmt;
use std::time::Duration;

use tracing::debug;

use crate::error::TrackError;
use crate::reservation::{CrossingReservation, Reservation};
use crate::train::TrainId;

/// Color of a signal tile, as reported by the sensor classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Color {
    /// Station tiles.
    Red,
    /// Green sector tiles.
    Green,
    /// Blue sector tiles.
    Blue,
    /// Yellow sector tiles.
    Yellow,
    /// Magenta sector tiles.
    Magenta,
    /// Light blue, used for level crossings in the reference layout.
    Cyan,
    /// White tiles.
    White,
}

impl Color {
    /// All colors the classifier can produce.
    pub const ALL: [Color; 7] = [
        Color::Red,
        Color::Green,
        Color::Blue,
        Color::Yellow,
        Color::Magenta,
        Color::Cyan,
        Color::White,
    ];

    /// Returns the color as an uppercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Color::Red => "RED",
            Color::Green => "GREEN",
            Color::Blue => "BLUE",
            Color::Yellow => "YELLOW",
            Color::Magenta => "MAGENTA",
            Color::Cyan => "CYAN",
            Color::White => "WHITE",
        }
    }

    /// Parse a color name. Trimmed and case-insensitive.
    ///
    /// ```
    /// use trainz_autopilot::track::Color;
    ///
    /// assert_eq!(Color::from_text("red"), Some(Color::Red));
    /// assert_eq!(Color::from_text(" Light Blue "), Some(Color::Cyan));
    /// assert_eq!(Color::from_text("purple"), Some(Color::Magenta));
    /// assert_eq!(Color::from_text("orange"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Some(Color::Red),
            "green" => Some(Color::Green),
            "blue" => Some(Color::Blue),
            "yellow" => Some(Color::Yellow),
            "magenta" | "purple" => Some(Color::Magenta),
            "cyan" | "light blue" | "light_blue" | "azure" => Some(Color::Cyan),
            "white" => Some(Color::White),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two logical cycles a train can walk over the sector set.
///
/// The cycles are not required to be mirror images of each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TravelDirection {
    /// Clockwise in the reference layout.
    #[default]
    A,
    /// Anti-clockwise in the reference layout.
    B,
}

impl TravelDirection {
    const fn index(self) -> usize {
        match self {
            TravelDirection::A => 0,
            TravelDirection::B => 1,
        }
    }

    /// Returns `"A"` or `"B"`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TravelDirection::A => "A",
            TravelDirection::B => "B",
        }
    }
}

/// Index of a sector inside its [`Track`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorId(pub(crate) usize);

/// Index of a crossing inside its [`Track`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrossingId(pub(crate) usize);

/// Sub-division of a structured sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SubSector {
    /// First part of the sector; always the state on entry.
    #[default]
    Fast,
    /// Second part, after the mid-sector tile.
    Slow,
}

/// What kind of sector this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectorKind {
    /// Entry tile, then exit tile.
    Plain,
    /// Entry tile, a mid-sector tile of the same color, then the exit tile.
    Structured {
        /// Power used to traverse the gap after the mid-sector tile
        /// when the next sector is free.
        slow_speed: u8,
    },
    /// A stopping point with a randomized dwell.
    Station,
}

/// Static description of a sector, consumed by [`TrackBuilder::add_sector`].
#[derive(Clone, Debug)]
pub struct SectorSpec {
    /// Unique name, e.g. `"RED_1"`.
    pub name: String,
    /// Color of the tiles bounding the sector.
    pub color: Color,
    /// Plain, structured or station.
    pub kind: SectorKind,
    /// Blind window after entry during which the own color is not an exit.
    pub sector_time: Duration,
    /// Power index magnitude to reach after entry.
    pub max_speed: u8,
    /// How long to hold `max_speed` before easing back.
    pub max_speed_time: Duration,
    /// Power index magnitude when leaving the sector.
    pub exit_speed: u8,
    /// Crossing guarded by tiles inside (or trailing) this sector.
    pub look_ahead: Option<CrossingId>,
}

impl SectorSpec {
    fn new(name: &str, color: Color, kind: SectorKind) -> Self {
        Self {
            name: name.to_string(),
            color,
            kind,
            sector_time: Duration::from_millis(800),
            max_speed: 5,
            max_speed_time: Duration::from_secs(8),
            exit_speed: 3,
            look_ahead: None,
        }
    }

    /// A plain sector.
    pub fn plain(name: &str, color: Color) -> Self {
        Self::new(name, color, SectorKind::Plain)
    }

    /// A structured sector with a FAST and a SLOW part.
    pub fn structured(name: &str, color: Color, slow_speed: u8) -> Self {
        Self::new(name, color, SectorKind::Structured { slow_speed })
    }

    /// A station.
    pub fn station(name: &str, color: Color) -> Self {
        Self::new(name, color, SectorKind::Station)
    }

    /// Set the post-entry blind window
    pub fn with_sector_time(mut self, ms: u64) -> Self {
        self.sector_time = Duration::from_millis(ms);
        self
    }

    /// Set the maximum speed and how long it is held
    pub fn with_max_speed(mut self, speed: u8, hold_ms: u64) -> Self {
        self.max_speed = speed.min(10);
        self.max_speed_time = Duration::from_millis(hold_ms);
        self
    }

    /// Set the exit speed
    pub fn with_exit_speed(mut self, speed: u8) -> Self {
        self.exit_speed = speed.min(10);
        self
    }

    /// Reference a crossing from this sector
    pub fn with_look_ahead(mut self, crossing: CrossingId) -> Self {
        self.look_ahead = Some(crossing);
        self
    }
}

/// A mutually-exclusive section of track.
#[derive(Debug)]
pub struct Sector {
    id: SectorId,
    spec: SectorSpec,
    next: [SectorId; 2],
    reservation: Reservation,
}

impl Sector {
    /// Sector id.
    pub fn id(&self) -> SectorId {
        self.id
    }

    /// Sector name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Tile color.
    pub fn color(&self) -> Color {
        self.spec.color
    }

    /// Sector kind.
    pub fn kind(&self) -> SectorKind {
        self.spec.kind
    }

    /// True for stations.
    pub fn is_station(&self) -> bool {
        matches!(self.spec.kind, SectorKind::Station)
    }

    /// True for structured sectors.
    pub fn is_structured(&self) -> bool {
        matches!(self.spec.kind, SectorKind::Structured { .. })
    }

    /// Post-entry blind window.
    pub fn sector_time(&self) -> Duration {
        self.spec.sector_time
    }

    /// Maximum speed after entry.
    pub fn max_speed(&self) -> u8 {
        self.spec.max_speed
    }

    /// Hold time for the maximum speed.
    pub fn max_speed_time(&self) -> Duration {
        self.spec.max_speed_time
    }

    /// Exit speed.
    pub fn exit_speed(&self) -> u8 {
        self.spec.exit_speed
    }

    /// Crossing referenced by this sector.
    pub fn look_ahead(&self) -> Option<CrossingId> {
        self.spec.look_ahead
    }

    /// Ownership cell.
    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// Current occupier, if any.
    pub fn occupier(&self) -> Option<TrainId> {
        self.reservation.occupier()
    }
}

/// A level crossing, shared single-train-at-a-time and independent of the
/// sector graph.
#[derive(Debug)]
pub struct Crossing {
    id: CrossingId,
    name: String,
    color: Color,
    reservation: CrossingReservation,
}

impl Crossing {
    /// Crossing id.
    pub fn id(&self) -> CrossingId {
        self.id
    }

    /// Crossing name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tile color.
    pub fn color(&self) -> Color {
        self.color
    }

    /// Booking cell.
    pub fn reservation(&self) -> &CrossingReservation {
        &self.reservation
    }
}

/// The fixed layout.
#[derive(Debug)]
pub struct Track {
    sectors: Vec<Sector>,
    crossings: Vec<Crossing>,
}

impl Track {
    /// Start building a layout.
    pub fn builder() -> TrackBuilder {
        TrackBuilder::new()
    }

    /// Successor of `sector` when travelling in `direction`.
    pub fn next(&self, sector: SectorId, direction: TravelDirection) -> SectorId {
        self.sectors[sector.0].next[direction.index()]
    }

    /// Look up a sector.
    pub fn sector(&self, id: SectorId) -> &Sector {
        &self.sectors[id.0]
    }

    /// Look up a crossing.
    pub fn crossing(&self, id: CrossingId) -> &Crossing {
        &self.crossings[id.0]
    }

    /// All sectors, in insertion order.
    pub fn sectors(&self) -> impl Iterator<Item = &Sector> {
        self.sectors.iter()
    }

    /// All crossings, in insertion order.
    pub fn crossings(&self) -> impl Iterator<Item = &Crossing> {
        self.crossings.iter()
    }

    /// Find a sector by name.
    pub fn sector_by_name(&self, name: &str) -> Option<SectorId> {
        self.sectors
            .iter()
            .find(|s| s.spec.name == name)
            .map(|s| s.id)
    }

    /// True if any crossing uses this tile color.
    pub fn is_crossing_color(&self, color: Color) -> bool {
        self.crossings.iter().any(|c| c.color == color)
    }

    /// Resolve which crossing a tile of `color` belongs to, given the sector
    /// the train is in (or has just left).
    pub fn crossing_for(&self, context: SectorId, color: Color) -> Option<CrossingId> {
        if let Some(id) = self.sector(context).look_ahead() {
            if self.crossing(id).color == color {
                return Some(id);
            }
        }
        let mut matching = self.crossings.iter().filter(|c| c.color == color);
        match (matching.next(), matching.next()) {
            (Some(only), None) => Some(only.id),
            _ => None,
        }
    }

    /// Atomically claim a sector for `train`.
    pub fn try_claim(&self, sector: SectorId, train: TrainId) -> bool {
        self.sector(sector).reservation.try_claim(train)
    }

    /// Release a sector if `train` holds it.
    pub fn release(&self, sector: SectorId, train: TrainId) -> bool {
        self.sector(sector).reservation.release(train)
    }

    /// True if `sector` is held by a train other than `train`.
    pub fn is_held_by_other(&self, sector: SectorId, train: TrainId) -> bool {
        !self.sector(sector).reservation.is_available_to(train)
    }

    /// Reset every occupier, booking and anti-starvation record.
    pub fn clear_track(&self) {
        for sector in &self.sectors {
            sector.reservation.clear();
        }
        for crossing in &self.crossings {
            crossing.reservation.clear();
        }
        debug!("track cleared");
    }

    /// Drop every claim held by `train`.
    pub fn release_all(&self, train: TrainId) {
        for sector in &self.sectors {
            sector.reservation.release(train);
        }
        for crossing in &self.crossings {
            crossing.reservation.release(train);
            crossing.reservation.withdraw(train);
        }
    }
}

/// Builder for [`Track`].
#[derive(Debug, Default)]
pub struct TrackBuilder {
    sectors: Vec<(SectorSpec, [Option<SectorId>; 2])>,
    crossings: Vec<(String, Color)>,
}

impl TrackBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sector and return its id.
    pub fn add_sector(&mut self, spec: SectorSpec) -> SectorId {
        self.sectors.push((spec, [None, None]));
        SectorId(self.sectors.len() - 1)
    }

    /// Add a crossing and return its id.
    pub fn add_crossing(&mut self, name: &str, color: Color) -> CrossingId {
        self.crossings.push((name.to_string(), color));
        CrossingId(self.crossings.len() - 1)
    }

    /// Set `to` as the successor of `from` in `direction`.
    pub fn connect(
        &mut self,
        from: SectorId,
        direction: TravelDirection,
        to: SectorId,
    ) -> &mut Self {
        self.sectors[from.0].1[direction.index()] = Some(to);
        self
    }

    /// Connect `order` into a closed cycle for `direction`.
    pub fn connect_cycle(&mut self, direction: TravelDirection, order: &[SectorId]) -> &mut Self {
        for (i, &from) in order.iter().enumerate() {
            let to = order[(i + 1) % order.len()];
            self.connect(from, direction, to);
        }
        self
    }

    /// Validate and freeze the layout.
    pub fn build(self) -> Result<Track, TrackError> {
        let mut names: Vec<&str> = Vec::with_capacity(self.sectors.len());
        for (spec, _) in &self.sectors {
            if names.contains(&spec.name.as_str()) {
                return Err(TrackError::DuplicateSector(spec.name.clone()));
            }
            names.push(&spec.name);
        }
        if !self
            .sectors
            .iter()
            .any(|(spec, _)| matches!(spec.kind, SectorKind::Station))
        {
            return Err(TrackError::NoStation);
        }

        let mut sectors = Vec::with_capacity(self.sectors.len());
        for (i, (spec, next)) in self.sectors.into_iter().enumerate() {
            if let Some(crossing) = spec.look_ahead {
                if crossing.0 >= self.crossings.len() {
                    return Err(TrackError::UnknownCrossing(crossing.0));
                }
            }
            let a = next[0].ok_or_else(|| TrackError::MissingSuccessor {
                sector: spec.name.clone(),
                direction: TravelDirection::A.as_str(),
            })?;
            let b = next[1].ok_or_else(|| TrackError::MissingSuccessor {
                sector: spec.name.clone(),
                direction: TravelDirection::B.as_str(),
            })?;
            sectors.push(Sector {
                id: SectorId(i),
                spec,
                next: [a, b],
                reservation: Reservation::new(),
            });
        }

        let crossings = self
            .crossings
            .into_iter()
            .enumerate()
            .map(|(i, (name, color))| Crossing {
                id: CrossingId(i),
                name,
                color,
                reservation: CrossingReservation::new(),
            })
            .collect();

        Ok(Track { sectors, crossings })
    }
}

/// The six-sector reference loop with one level crossing.
///
/// Direction B: `RED_1 → GREEN → BLUE → RED_2 → MAGENTA → YELLOW → RED_1`.
/// Direction A runs the same loop backwards. `GREEN` (plain) and `BLUE`
/// (structured) are fast sectors; the crossing's tiles sit in `GREEN` and
/// trail behind station `RED_1`.
pub fn standard_loop() -> Track {
    let mut b = TrackBuilder::new();
    let crossing = b.add_crossing("LEVEL_CROSSING", Color::Cyan);

    let red_1 = b.add_sector(SectorSpec::station("RED_1", Color::Red).with_look_ahead(crossing));
    let green = b.add_sector(
        SectorSpec::plain("GREEN", Color::Green)
            .with_max_speed(5, 8_000)
            .with_exit_speed(3)
            .with_look_ahead(crossing),
    );
    let blue = b.add_sector(
        SectorSpec::structured("BLUE", Color::Blue, 2)
            .with_max_speed(5, 8_000)
            .with_exit_speed(3),
    );
    let red_2 = b.add_sector(SectorSpec::station("RED_2", Color::Red));
    let magenta = b.add_sector(
        SectorSpec::plain("MAGENTA", Color::Magenta)
            .with_max_speed(4, 4_000)
            .with_exit_speed(3),
    );
    let yellow = b.add_sector(
        SectorSpec::structured("YELLOW", Color::Yellow, 2)
            .with_max_speed(4, 4_000)
            .with_exit_speed(2),
    );

    b.connect_cycle(TravelDirection::B, &[red_1, green, blue, red_2, magenta, yellow]);
    b.connect_cycle(TravelDirection::A, &[red_1, yellow, magenta, red_2, blue, green]);

    // Every sector has both successors and a station exists.
    match b.build() {
        Ok(track) => track,
        Err(e) => unreachable!("reference layout is invalid: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(track: &Track, name: &str) -> SectorId {
        track.sector_by_name(name).unwrap()
    }

    #[test]
    fn standard_loop_direction_b_cycle() {
        let track = standard_loop();
        let mut at = id(&track, "RED_1");
        let mut names = vec![];
        for _ in 0..6 {
            at = track.next(at, TravelDirection::B);
            names.push(track.sector(at).name().to_string());
        }
        assert_eq!(names, ["GREEN", "BLUE", "RED_2", "MAGENTA", "YELLOW", "RED_1"]);
    }

    #[test]
    fn directions_are_independent_cycles() {
        let track = standard_loop();
        let green = id(&track, "GREEN");
        assert_eq!(track.next(green, TravelDirection::B), id(&track, "BLUE"));
        assert_eq!(track.next(green, TravelDirection::A), id(&track, "RED_1"));
    }

    #[test]
    fn builder_rejects_missing_successor() {
        let mut b = TrackBuilder::new();
        let s = b.add_sector(SectorSpec::station("S", Color::Red));
        let g = b.add_sector(SectorSpec::plain("G", Color::Green));
        b.connect_cycle(TravelDirection::A, &[s, g]);
        assert!(matches!(
            b.build(),
            Err(TrackError::MissingSuccessor { direction: "B", .. })
        ));
    }

    #[test]
    fn builder_rejects_duplicate_names() {
        let mut b = TrackBuilder::new();
        let s = b.add_sector(SectorSpec::station("S", Color::Red));
        let t = b.add_sector(SectorSpec::plain("S", Color::Green));
        b.connect_cycle(TravelDirection::A, &[s, t]);
        b.connect_cycle(TravelDirection::B, &[s, t]);
        assert_eq!(b.build().unwrap_err(), TrackError::DuplicateSector("S".into()));
    }

    #[test]
    fn builder_requires_station() {
        let mut b = TrackBuilder::new();
        let g = b.add_sector(SectorSpec::plain("G", Color::Green));
        b.connect_cycle(TravelDirection::A, &[g]);
        b.connect_cycle(TravelDirection::B, &[g]);
        assert_eq!(b.build().unwrap_err(), TrackError::NoStation);
    }

    #[test]
    fn crossing_resolved_through_look_ahead() {
        let track = standard_loop();
        let red_1 = id(&track, "RED_1");
        let blue = id(&track, "BLUE");
        let crossing = track.crossing_for(red_1, Color::Cyan).unwrap();
        assert_eq!(track.crossing(crossing).name(), "LEVEL_CROSSING");
        // single crossing of that color: found even without a reference
        assert_eq!(track.crossing_for(blue, Color::Cyan), Some(crossing));
        assert_eq!(track.crossing_for(blue, Color::White), None);
    }

    #[test]
    fn clear_track_frees_everything() {
        let track = standard_loop();
        let t1 = TrainId(1);
        let green = id(&track, "GREEN");
        assert!(track.try_claim(green, t1));
        let crossing = track.crossings().next().unwrap();
        crossing.reservation().toggle(t1);
        assert_eq!(crossing.reservation().booked_by(), Some(t1));

        track.clear_track();

        assert_eq!(track.sector(green).occupier(), None);
        assert_eq!(crossing.reservation().booked_by(), None);
    }

    #[test]
    fn crossing_color_lookup() {
        let track = standard_loop();
        assert!(track.is_crossing_color(Color::Cyan));
        assert!(!track.is_crossing_color(Color::Red));
    }
}
