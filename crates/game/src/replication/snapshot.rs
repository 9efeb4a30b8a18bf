use crate::net::{DecodeError, WireReader, WireWriter};

/// Deepest object tree a snapshot may carry.
const MAX_TREE_DEPTH: usize = 64;

/// Smallest encoded node: type, id, owner, blob length, child count.
const MIN_NODE_LEN: usize = 20;

/// Highest command sequence the authority has applied for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    pub client_id: i32,
    pub sequence: u32,
}

/// One replicated node as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTree {
    pub type_id: u32,
    pub network_id: i32,
    pub owner: i32,
    pub blob: Vec<u8>,
    pub children: Vec<ObjectTree>,
}

impl ObjectTree {
    pub fn encode(&self, writer: &mut WireWriter) {
        writer.write_u32(self.type_id);
        writer.write_i32(self.network_id);
        writer.write_i32(self.owner);
        writer.write_blob(&self.blob);
        writer.write_i32(self.children.len() as i32);
        for child in &self.children {
            child.encode(writer);
        }
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Self::decode_at(reader, 0)
    }

    fn decode_at(reader: &mut WireReader<'_>, depth: usize) -> Result<Self, DecodeError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(DecodeError::LengthOutOfRange(depth as i64));
        }

        let type_id = reader.read_u32()?;
        let network_id = reader.read_i32()?;
        let owner = reader.read_i32()?;
        let blob = reader.read_blob()?.to_vec();
        let count = reader.read_count(MIN_NODE_LEN)?;

        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            children.push(Self::decode_at(reader, depth + 1)?);
        }

        Ok(Self {
            type_id,
            network_id,
            owner,
            blob,
            children,
        })
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ObjectTree::node_count).sum::<usize>()
    }
}

/// Authoritative world state for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub tick: u32,
    pub scene_epoch: u32,
    pub acks: Vec<CommandAck>,
    pub objects: Vec<ObjectTree>,
}

impl Snapshot {
    pub fn encode(&self, writer: &mut WireWriter) {
        writer.write_u32(self.tick);
        writer.write_u32(self.scene_epoch);

        writer.write_i32(self.acks.len() as i32);
        for ack in &self.acks {
            writer.write_i32(ack.client_id);
            writer.write_u32(ack.sequence);
        }

        writer.write_i32(self.objects.len() as i32);
        for object in &self.objects {
            object.encode(writer);
        }
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let tick = reader.read_u32()?;
        let scene_epoch = reader.read_u32()?;

        let ack_count = reader.read_count(8)?;
        let mut acks = Vec::with_capacity(ack_count);
        for _ in 0..ack_count {
            acks.push(CommandAck {
                client_id: reader.read_i32()?,
                sequence: reader.read_u32()?,
            });
        }

        let object_count = reader.read_count(MIN_NODE_LEN)?;
        let mut objects = Vec::with_capacity(object_count);
        for _ in 0..object_count {
            objects.push(ObjectTree::decode(reader)?);
        }

        Ok(Self {
            tick,
            scene_epoch,
            acks,
            objects,
        })
    }

    pub fn ack_for(&self, client_id: i32) -> Option<u32> {
        self.acks
            .iter()
            .find(|ack| ack.client_id == client_id)
            .map(|ack| ack.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(network_id: i32) -> ObjectTree {
        ObjectTree {
            type_id: 2,
            network_id,
            owner: -1,
            blob: vec![0, 0],
            children: Vec::new(),
        }
    }

    #[test]
    fn nested_tree_layout() {
        let tree = ObjectTree {
            type_id: 1,
            network_id: 3,
            owner: 1,
            blob: vec![9],
            children: vec![leaf(4)],
        };

        let mut writer = WireWriter::new();
        tree.encode(&mut writer);
        let bytes = writer.into_bytes();

        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &1i32.to_le_bytes());
        assert_eq!(bytes[16], 9);
        assert_eq!(&bytes[17..21], &1i32.to_le_bytes());

        let decoded = ObjectTree::decode(&mut WireReader::new(&bytes)).unwrap();
        assert_eq!(decoded, tree);
        assert_eq!(decoded.node_count(), 2);
    }

    #[test]
    fn negative_counts_are_rejected() {
        let mut writer = WireWriter::new();
        writer.write_u32(1);
        writer.write_u32(0);
        writer.write_i32(-1);
        let bytes = writer.into_bytes();

        assert!(matches!(
            Snapshot::decode(&mut WireReader::new(&bytes)),
            Err(DecodeError::LengthOutOfRange(-1))
        ));
    }

    #[test]
    fn excessive_depth_is_rejected() {
        let mut tree = leaf(0);
        for id in 1..(MAX_TREE_DEPTH as i32 + 1) {
            tree = ObjectTree {
                children: vec![tree],
                ..leaf(id)
            };
        }

        let mut writer = WireWriter::new();
        tree.encode(&mut writer);
        let bytes = writer.into_bytes();
        assert!(ObjectTree::decode(&mut WireReader::new(&bytes)).is_err());
    }

    #[test]
    fn ack_lookup() {
        let snapshot = Snapshot {
            acks: vec![
                CommandAck {
                    client_id: 1,
                    sequence: 10,
                },
                CommandAck {
                    client_id: 2,
                    sequence: 4,
                },
            ],
            ..Default::default()
        };
        assert_eq!(snapshot.ack_for(2), Some(4));
        assert_eq!(snapshot.ack_for(3), None);
    }
}
