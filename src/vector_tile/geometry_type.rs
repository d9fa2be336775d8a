#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum GeomType {
	#[default]
	Unknown = 0,
	Point = 1,
	LineString = 2,
	Polygon = 3,
}

impl GeomType {
	pub fn as_u64(&self) -> u64 {
		*self as u64
	}
}

impl From<u64> for GeomType {
	fn from(value: u64) -> Self {
		match value {
			1 => GeomType::Point,
			2 => GeomType::LineString,
			3 => GeomType::Polygon,
			_ => GeomType::Unknown,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip() {
		for geom_type in [GeomType::Point, GeomType::LineString, GeomType::Polygon] {
			assert_eq!(GeomType::from(geom_type.as_u64()), geom_type);
		}
		assert_eq!(GeomType::from(0), GeomType::Unknown);
		assert_eq!(GeomType::from(99), GeomType::Unknown);
	}
}
