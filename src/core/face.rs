use glam::IVec3;

/// The six cardinal block faces.
///
/// Discriminant order fixes the bit layout of a visibility mask:
/// bit N of the mask corresponds to `Face::ALL[N]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Face {
    Up = 0,
    Down = 1,
    North = 2,
    South = 3,
    East = 4,
    West = 5,
}

pub const FACE_COUNT: usize = 6;

/// Mask with all six face bits set.
pub const ALL_FACES: u8 = 0b0011_1111;

impl Face {
    pub const ALL: [Face; FACE_COUNT] = [
        Face::Up,
        Face::Down,
        Face::North,
        Face::South,
        Face::East,
        Face::West,
    ];

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Unit offset toward the neighbor across this face.
    pub fn offset(self) -> IVec3 {
        match self {
            Face::Up => IVec3::new(0, 1, 0),
            Face::Down => IVec3::new(0, -1, 0),
            Face::North => IVec3::new(0, 0, 1),
            Face::South => IVec3::new(0, 0, -1),
            Face::East => IVec3::new(1, 0, 0),
            Face::West => IVec3::new(-1, 0, 0),
        }
    }

    pub fn opposite(self) -> Face {
        match self {
            Face::Up => Face::Down,
            Face::Down => Face::Up,
            Face::North => Face::South,
            Face::South => Face::North,
            Face::East => Face::West,
            Face::West => Face::East,
        }
    }

    pub fn normal(self) -> [f32; 3] {
        let o = self.offset();
        [o.x as f32, o.y as f32, o.z as f32]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_is_involutive() {
        for face in Face::ALL {
            assert_eq!(face.opposite().opposite(), face);
            assert_eq!(face.offset() + face.opposite().offset(), IVec3::ZERO);
        }
    }

    #[test]
    fn bits_are_disjoint_and_cover_all_faces() {
        let mut combined = 0u8;
        for face in Face::ALL {
            assert_eq!(combined & face.bit(), 0);
            combined |= face.bit();
        }
        assert_eq!(combined, ALL_FACES);
    }
}
