use std::{
    fmt::Write,
    sync::{Arc, Weak},
};

use super::{
    debug::DebugRegisterPort,
    master::MasterDevice,
    switch::{PortId, PortType, SwitchTree},
};
use crate::{
    arbiter::{HolderId, OperatorToken},
    attr::{
        parse_decimal, parse_hex_u16, parse_hex_u64, parse_hex_u8, tokens, AttrMode, Attribute,
        AttributeGroup,
    },
    error::{Error, Result},
};

/// Which ports the `pvlan` attribute lists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PvlanListing {
    /// Every port of the tree, unused ones included
    AllPorts,
    #[default]
    SkipUnused,
}

static ATTRIBUTES: [Attribute; 6] = [
    Attribute::new("tagging_cpu", AttrMode::ReadWrite),
    Attribute::new("tagging_imp", AttrMode::ReadWrite),
    Attribute::new("pvlan", AttrMode::ReadWrite),
    Attribute::new("rdreg", AttrMode::ReadWrite),
    Attribute::new("wrreg", AttrMode::WriteOnly),
    Attribute::new("clock_short", AttrMode::ReadWrite),
];

/// The `dsa` attribute group of a master device
pub struct DsaAttributes {
    master: Weak<MasterDevice>,
    tree: Arc<SwitchTree>,
    cpu_port: PortId,
    debug: DebugRegisterPort,
    operator: HolderId,
    pvlan_listing: PvlanListing,
}

impl DsaAttributes {
    pub fn new(master: &Arc<MasterDevice>, tree: Arc<SwitchTree>, cpu_port: PortId) -> Self {
        let operator = tree.arbiter().register_holder();
        Self {
            master: Arc::downgrade(master),
            debug: DebugRegisterPort::new(tree.clone(), cpu_port),
            tree,
            cpu_port,
            operator,
            pvlan_listing: PvlanListing::default(),
        }
    }

    pub fn with_pvlan_listing(mut self, listing: PvlanListing) -> Self {
        self.pvlan_listing = listing;
        self
    }

    fn show_pvlan(&self) -> Result<String> {
        let mut out = String::new();
        for (id, port) in self.tree.ports() {
            if self.pvlan_listing == PvlanListing::SkipUnused && port.kind == PortType::Unused {
                continue;
            }
            let ops = self.tree.switch_ops(id);
            if !ops.capabilities().get_pvlan {
                return Err(Error::Unsupported);
            }
            let members = self.tree.on_bus(|| ops.port_get_pvlan(port.index))?;
            let _ = write!(out, "{}:{:03x} ", port.index, members);
        }
        out.push('\n');
        Ok(out)
    }

    fn store_pvlan(&self, input: &str) -> Result<()> {
        let fields = tokens(input, ':', 2)?;
        let index: u8 = parse_decimal(fields[0])?;
        let members = parse_hex_u16(fields[1])?;

        let id = self
            .tree
            .find_port(index)
            .ok_or_else(|| Error::invalid(format!("no port {index}")))?;
        let ops = self.tree.switch_ops(id);
        if !ops.capabilities().change_pvlan {
            return Err(Error::Unsupported);
        }
        self.tree
            .on_bus(|| ops.port_change_pvlan(index, members))
    }

    fn store_rdreg(&self, input: &str) -> Result<()> {
        let fields = tokens(input, ':', 3)?;
        let page = parse_hex_u8(fields[0])?;
        let register = parse_hex_u8(fields[1])?;
        let width = parse_hex_u8(fields[2])?;
        self.debug.prepare(page, register, width)?;
        Ok(())
    }

    fn store_wrreg(&self, input: &str) -> Result<()> {
        let fields = tokens(input, ':', 4)?;
        let page = parse_hex_u8(fields[0])?;
        let register = parse_hex_u8(fields[1])?;
        let width = parse_hex_u8(fields[2])?;
        let value = parse_hex_u64(fields[3])?;
        self.debug.write(page, register, width, value)
    }

    fn store_clock_short(&self, input: &str) -> Result<()> {
        let enabled = match input.as_bytes() {
            [b'0', b'\n' | b'\0'] => false,
            [b'1', b'\n' | b'\0'] => true,
            _ => {
                return Err(Error::invalid(format!(
                    "expected 0 or 1 and a terminator, got {input:?}"
                )))
            }
        };
        self.tree
            .arbiter()
            .set_short_mode(self.operator, enabled, &OperatorToken::new());
        Ok(())
    }
}

impl AttributeGroup for DsaAttributes {
    fn name(&self) -> &'static str {
        "dsa"
    }

    fn attributes(&self) -> &'static [Attribute] {
        &ATTRIBUTES
    }

    fn show(&self, attribute: &Attribute) -> Result<String> {
        match attribute.name {
            "tagging_cpu" => Ok(format!("{}\n", self.tree.tagging().active().name)),
            "tagging_imp" => Ok(format!(
                "{}\n",
                self.tree.cpu_port_protocol(self.cpu_port)?.name
            )),
            "pvlan" => self.show_pvlan(),
            "rdreg" => Ok(format!("{}\n", self.debug.read()?)),
            "clock_short" => Ok(format!("{}\n", u8::from(self.tree.arbiter().short_mode()))),
            _ => Err(Error::PermissionDenied),
        }
    }

    fn store(&self, attribute: &Attribute, input: &str) -> Result<usize> {
        match attribute.name {
            "tagging_cpu" => {
                let master = self
                    .master
                    .upgrade()
                    .ok_or_else(|| Error::NotFound("master device".into()))?;
                self.tree.change_tag_protocol(input, &master)?;
            }
            "tagging_imp" => self.tree.force_cpu_port_protocol(self.cpu_port, input)?,
            "pvlan" => self.store_pvlan(input)?,
            "rdreg" => self.store_rdreg(input)?,
            "wrreg" => self.store_wrreg(input)?,
            "clock_short" => self.store_clock_short(input)?,
            _ => return Err(Error::PermissionDenied),
        }
        Ok(input.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dsa::TagProtocolId,
        testing::{test_master, test_tree, FakeSwitch},
    };

    struct Fixture {
        attrs: DsaAttributes,
        switch: Arc<FakeSwitch>,
        master: Arc<MasterDevice>,
    }

    fn fixture() -> Fixture {
        let (tree, switch, _) = test_tree(FakeSwitch::default());
        let (master, _) = test_master();
        let master = Arc::new(master);
        let cpu = tree.find_port(8).unwrap();
        Fixture {
            attrs: DsaAttributes::new(&master, tree, cpu),
            switch,
            master,
        }
    }

    #[test]
    fn tagging_cpu() {
        let f = fixture();
        assert_eq!(f.attrs.read("tagging_cpu").unwrap(), "brcm\n");

        assert_eq!(f.attrs.write("tagging_cpu", "dsa\n").unwrap(), 4);
        assert_eq!(f.attrs.read("tagging_cpu").unwrap(), "dsa\n");
        assert_eq!(f.master.mtu(), 1504);

        assert!(matches!(
            f.attrs.write("tagging_cpu", "nope\n"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn tagging_cpu_without_master() {
        let f = fixture();
        drop(f.master);
        assert!(matches!(
            f.attrs.write("tagging_cpu", "dsa\n"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn tagging_imp() {
        let f = fixture();
        assert_eq!(f.attrs.read("tagging_imp").unwrap(), "brcm\n");
        f.attrs.write("tagging_imp", "brcm-legacy\n").unwrap();
        assert_eq!(f.attrs.read("tagging_imp").unwrap(), "brcm-legacy\n");
        assert_eq!(f.switch.tag_protocol(8), Some(TagProtocolId::BrcmLegacy));
        assert_eq!(f.attrs.read("tagging_cpu").unwrap(), "brcm\n");
    }

    #[test]
    fn pvlan_listing() {
        let f = fixture();
        f.switch.set_pvlan(3, 0x0a5);
        assert_eq!(
            f.attrs.read("pvlan").unwrap(),
            "0:1ff 1:1ff 2:1ff 3:0a5 4:1ff 8:1ff \n"
        );

        let (tree, _, _) = test_tree(FakeSwitch::default());
        let cpu = tree.find_port(8).unwrap();
        let all = DsaAttributes::new(&f.master, tree, cpu).with_pvlan_listing(PvlanListing::AllPorts);
        assert_eq!(
            all.read("pvlan").unwrap(),
            "0:1ff 1:1ff 2:1ff 3:1ff 4:1ff 5:1ff 8:1ff \n"
        );
    }

    #[test]
    fn pvlan_write() {
        let f = fixture();
        assert_eq!(f.attrs.write("pvlan", "3:0a5").unwrap(), 5);
        assert_eq!(f.switch.pvlan(3), 0x0a5);

        assert!(matches!(
            f.attrs.write("pvlan", "99:0a5"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            f.attrs.write("pvlan", "3"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            f.attrs.write("pvlan", "3:xyz"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(f.switch.pvlan(3), 0x0a5);
    }

    #[test]
    fn pvlan_unsupported() {
        let switch = FakeSwitch::default();
        switch.without_pvlan();
        let (tree, _, _) = test_tree(switch);
        let (master, _) = test_master();
        let cpu = tree.find_port(8).unwrap();
        let attrs = DsaAttributes::new(&Arc::new(master), tree, cpu);
        assert_eq!(attrs.read("pvlan"), Err(Error::Unsupported));
        assert_eq!(attrs.write("pvlan", "3:0a5"), Err(Error::Unsupported));
    }

    #[test]
    fn register_read_and_write() {
        let f = fixture();
        f.switch.set_register(0x02, 0x30, 0x12);

        assert_eq!(f.attrs.write("rdreg", "2:30:1\n").unwrap(), 7);
        assert_eq!(f.attrs.read("rdreg").unwrap(), "12\n");

        f.attrs.write("wrreg", "2:30:4:deadbeef\n").unwrap();
        assert_eq!(f.switch.register(0x02, 0x30), Some(0xdead_beef));
        f.attrs.write("rdreg", "2:30:4").unwrap();
        assert_eq!(f.attrs.read("rdreg").unwrap(), "deadbeef\n");

        assert_eq!(f.attrs.read("wrreg"), Err(Error::PermissionDenied));
    }

    #[test]
    fn register_read_in_every_width() {
        let f = fixture();
        f.switch.set_register(0x04, 0x10, 0x12);

        for (width, digits) in [(1, 2), (2, 4), (4, 8), (6, 16), (8, 16)] {
            f.attrs.write("rdreg", &format!("4:10:{width}\n")).unwrap();
            let shown = f.attrs.read("rdreg").unwrap();
            let value = shown.strip_suffix('\n').unwrap();
            assert_eq!(value.len(), digits, "width {width}");
            assert_eq!(u64::from_str_radix(value, 16).unwrap(), 0x12);
        }
    }

    #[test]
    fn malformed_register_writes() {
        let f = fixture();
        f.attrs.write("rdreg", "2:30:1").unwrap();
        let latched = f.attrs.debug.pending();

        for input in ["2:30", "2:30:1:5", "2:30:3", "zz:30:1", "2::1"] {
            assert!(
                matches!(f.attrs.write("rdreg", input), Err(Error::InvalidArgument(_))),
                "{input}"
            );
        }
        assert_eq!(f.attrs.debug.pending(), latched);

        assert!(matches!(
            f.attrs.write("wrreg", "2:30:1:1ff"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(f.switch.register(0x02, 0x30), None);
    }

    #[test]
    fn clock_short() {
        let f = fixture();
        assert_eq!(f.attrs.read("clock_short").unwrap(), "0\n");

        assert_eq!(f.attrs.write("clock_short", "1\n").unwrap(), 2);
        assert_eq!(f.attrs.read("clock_short").unwrap(), "1\n");
        assert!(!f.attrs.tree.arbiter().is_held());

        f.attrs.write("clock_short", "0\0").unwrap();
        assert_eq!(f.attrs.read("clock_short").unwrap(), "0\n");

        for input in ["1", "2\n", "10\n", "1\n\n", ""] {
            assert!(
                matches!(
                    f.attrs.write("clock_short", input),
                    Err(Error::InvalidArgument(_))
                ),
                "{input:?}"
            );
        }
        assert_eq!(f.attrs.read("clock_short").unwrap(), "0\n");
    }
}
