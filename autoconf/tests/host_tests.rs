/// Host-side scenario tests for the device framework.
///
/// These run on the host with `cargo test` and drive the whole stack through small sample
/// drivers backed by RAM bus windows:
///   - boot from a platform descriptor, unit numbering, "not configured" slots
///   - lazy probing behind bridges
///   - match tie-break and determinism
///   - attach failure isolation and critical devices
///   - LIFO detach and resource release
///   - hard interrupts handing work to soft interrupts
///   - disestablish vs. concurrent dispatch
///   - hot-plug
///
/// Run: cargo test -p autoconf --test host_tests
extern crate autoconf;

use autoconf::{
    Config, Error, Result,
    bus_space::{BusSpaceHandle, BusSpaceTag, ByteOrder, MapFlags, TagSpec, ram_tag},
    dev::{
        AttachArgs, AttachContext, Autoconf, CriticalRole, DetachContext, DetachFlags,
        DeviceNode, DeviceState, Driver, DriverTable, HotplugOutcome, Ident, SlotOutcome, Softc,
    },
    intr::{Claim, Dispatch, IntrSpec, IntrTable, Ipl, SourceConfig, Trigger},
    platform::{Platform, bootstrap},
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

// ─── Sample drivers ─────────────────────────────────────────────────

type Trace = Arc<Mutex<Vec<String>>>;

fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(trace: &Trace, line: String) {
    trace.lock().unwrap().push(line);
}

const COM_SCRATCH: u64 = 7;
const COM_IIR: u64 = 2;

/// 16550-style UART on a legacy bus.
struct Com;

struct ComSoftc {
    regs: BusSpaceHandle,
    interrupts: Arc<ComIntr>,
}

struct ComIntr {
    regs: BusSpaceHandle,
    hits: AtomicU32,
}

impl Driver for Com {
    fn name(&self) -> &'static str {
        "com"
    }

    fn bus_classes(&self) -> &'static [&'static str] {
        &["isa"]
    }

    fn probe(&self, _parent: &DeviceNode, args: &AttachArgs) -> u32 {
        u32::from(args.is_named("com") || args.compatible_rank("ns16550a").is_some())
    }

    fn attach(&self, ctx: &mut AttachContext, args: &AttachArgs) -> Result<Softc> {
        let regs = ctx.map_reg(args, 0, MapFlags::empty())?;
        regs.write_1(COM_SCRATCH, 0x5a);
        if regs.read_1(COM_SCRATCH) != 0x5a {
            return Err(Error::HardwareRejected);
        }
        // No interrupt pending.
        regs.write_1(COM_IIR, 0x01);
        let interrupts = Arc::new(ComIntr {
            regs: regs.clone(),
            hits: AtomicU32::new(0),
        });
        if let Some(spec) = args.intrs.first() {
            ctx.establish(
                *spec,
                Ipl::Tty,
                |sc: &ComIntr| {
                    if sc.regs.read_1(COM_IIR) & 0x01 != 0 {
                        return Claim::Unclaimed;
                    }
                    sc.hits.fetch_add(1, Ordering::SeqCst);
                    sc.regs.write_1(COM_IIR, 0x01);
                    Claim::Claimed
                },
                interrupts.clone(),
            )?;
        }
        Ok(Box::new(ComSoftc { regs, interrupts }))
    }

    fn detach(&self, _: &mut DetachContext, _: &mut Softc, _: DetachFlags) -> Result<()> {
        Ok(())
    }
}

/// A device whose status register never reports ready.
struct Stuck;

impl Driver for Stuck {
    fn name(&self) -> &'static str {
        "stuck"
    }

    fn bus_classes(&self) -> &'static [&'static str] {
        &["isa"]
    }

    fn probe(&self, _parent: &DeviceNode, args: &AttachArgs) -> u32 {
        u32::from(args.is_named("stuck"))
    }

    fn attach(&self, ctx: &mut AttachContext, args: &AttachArgs) -> Result<Softc> {
        let regs = ctx.map_reg(args, 0, MapFlags::empty())?;
        ctx.spin_wait(|| regs.read_1(0) & 0x80 != 0)?;
        Ok(Box::new(()))
    }

    fn detach(&self, _: &mut DetachContext, _: &mut Softc, _: DetachFlags) -> Result<()> {
        Ok(())
    }
}

/// PCI-PCI bridge; reports the devices behind it from its attach.
struct Ppb {
    trace: Trace,
    downstream: Vec<AttachArgs>,
}

impl Driver for Ppb {
    fn name(&self) -> &'static str {
        "ppb"
    }

    fn bus_classes(&self) -> &'static [&'static str] {
        &["pci"]
    }

    fn probe(&self, _parent: &DeviceNode, args: &AttachArgs) -> u32 {
        match args.ident {
            Ident::Pci { class, .. } if class >> 8 == 0x0604 => 10,
            _ => 0,
        }
    }

    fn attach(&self, ctx: &mut AttachContext, _args: &AttachArgs) -> Result<Softc> {
        push(&self.trace, format!("attach {}", ctx.xname()));
        for child in &self.downstream {
            ctx.config_found(child.clone());
        }
        Ok(Box::new(()))
    }

    fn detach(&self, ctx: &mut DetachContext, _: &mut Softc, _: DetachFlags) -> Result<()> {
        push(&self.trace, format!("detach {}", ctx.xname()));
        Ok(())
    }
}

/// Crypto accelerator: two register windows and an interrupt, released on detach.
struct Hifn {
    trace: Trace,
}

impl Driver for Hifn {
    fn name(&self) -> &'static str {
        "hifn"
    }

    fn bus_classes(&self) -> &'static [&'static str] {
        &["pci"]
    }

    fn probe(&self, parent: &DeviceNode, args: &AttachArgs) -> u32 {
        push(
            &self.trace,
            format!("probe hifn at {}", parent.xname()),
        );
        match args.ident {
            Ident::Pci { vendor: 0x13a3, .. } => 1,
            _ => 0,
        }
    }

    fn attach(&self, ctx: &mut AttachContext, args: &AttachArgs) -> Result<Softc> {
        let bar0 = ctx.map_reg(args, 0, MapFlags::empty())?;
        let _bar1 = ctx.map_reg(args, 1, MapFlags::empty())?;
        let spec = *args.intrs.first().ok_or(Error::OutOfRange)?;
        let trace = self.trace.clone();
        let done = ctx.softint_establish(
            Ipl::SoftNet,
            move |xname: &String| push(&trace, format!("softint {}", xname)),
            Arc::new(ctx.xname().to_string()),
        );
        ctx.establish(
            spec,
            Ipl::Net,
            move |intr: &IntrTable| {
                intr.softint_schedule(done);
                Claim::Claimed
            },
            ctx.intr().clone(),
        )?;
        push(&self.trace, format!("attach {}", ctx.xname()));
        Ok(Box::new(bar0))
    }

    fn detach(&self, ctx: &mut DetachContext, _: &mut Softc, _: DetachFlags) -> Result<()> {
        push(&self.trace, format!("detach {}", ctx.xname()));
        Ok(())
    }
}

/// Matches every slot of `class` with a fixed score.
struct Scored {
    name: &'static str,
    score: u32,
}

impl Driver for Scored {
    fn name(&self) -> &'static str {
        self.name
    }

    fn bus_classes(&self) -> &'static [&'static str] {
        &["test"]
    }

    fn probe(&self, _: &DeviceNode, _: &AttachArgs) -> u32 {
        self.score
    }

    fn attach(&self, _: &mut AttachContext, _: &AttachArgs) -> Result<Softc> {
        Ok(Box::new(()))
    }

    fn detach(&self, _: &mut DetachContext, _: &mut Softc, _: DetachFlags) -> Result<()> {
        Ok(())
    }
}

/// Refuses to detach while open.
struct Busy;

impl Driver for Busy {
    fn name(&self) -> &'static str {
        "busy"
    }

    fn bus_classes(&self) -> &'static [&'static str] {
        &["test"]
    }

    fn probe(&self, _: &DeviceNode, _: &AttachArgs) -> u32 {
        1
    }

    fn attach(&self, _: &mut AttachContext, _: &AttachArgs) -> Result<Softc> {
        Ok(Box::new(()))
    }

    fn detach(&self, _: &mut DetachContext, _: &mut Softc, _: DetachFlags) -> Result<()> {
        Err(Error::Busy)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn config() -> Config {
    Config {
        intr_sources: 32,
        intr_chain_max: 4,
        max_cpus: 2,
        attach_spin_limit: 64,
    }
}

fn isa_tag() -> BusSpaceTag {
    ram_tag(TagSpec::new("isa", ByteOrder::Little, 0..0x1_0000))
        .unwrap()
        .0
}

fn pci_tag() -> BusSpaceTag {
    ram_tag(TagSpec::new("pcimem", ByteOrder::Little, 0x8000_0000..0x8010_0000))
        .unwrap()
        .0
}

fn com(tag: &BusSpaceTag, port: u64, irq: usize) -> AttachArgs {
    AttachArgs::new("isa")
        .name("com")
        .locator("port", port)
        .reg(tag, port, 8)
        .intr(IntrSpec {
            source: irq,
            trigger: Trigger::Edge,
        })
}

fn hifn(tag: &BusSpaceTag, dev: u64, base: u64, irq: usize) -> AttachArgs {
    AttachArgs::new("pci")
        .pci(0x13a3, 0x0005, 0x0b_4000, 1)
        .locator("dev", dev)
        .reg(tag, base, 0x1000)
        .reg(tag, base + 0x1000, 0x1000)
        .intr(IntrSpec {
            source: irq,
            trigger: Trigger::Level,
        })
}

fn ppb(dev: u64) -> AttachArgs {
    AttachArgs::new("pci")
        .pci(0x8086, 0x244e, 0x0604_00, 0)
        .locator("dev", dev)
}

fn isa_platform(tag: &BusSpaceTag) -> Platform {
    Platform::new().root(
        "isa",
        AttachArgs::new("mainbus"),
        vec![
            com(tag, 0x3f8, 4),
            AttachArgs::new("isa").name("lpt").locator("port", 0x378),
            com(tag, 0x2f8, 3),
        ],
    )
}

fn isa_drivers() -> DriverTable {
    let mut drivers = DriverTable::new();
    drivers.register(Com);
    drivers.register(Stuck);
    drivers
}

// ─── Boot ───────────────────────────────────────────────────────────

#[test]
fn boot_attaches_matching_slots_with_lowest_units() {
    let tag = isa_tag();
    let ac = bootstrap(config(), isa_platform(&tag), isa_drivers()).unwrap();
    assert_eq!(
        ac.tree_names(),
        ["isa0", "com0 at isa0", "com1 at isa0"]
    );
    let com1 = ac.find("com1").unwrap();
    assert_eq!(ac.state(com1), Some(DeviceState::Attached));
    assert_eq!(ac.softc::<ComSoftc>(com1).unwrap().regs.base(), 0x2f8);
    assert!(ac.find("lpt0").is_none());
    assert_eq!(tag.mappings(), 2);
    assert_eq!(ac.intr().handlers(4), ["com0"]);
    assert_eq!(ac.intr().handlers(3), ["com1"]);
}

#[test]
fn interrupts_reach_attached_driver() {
    let tag = isa_tag();
    let ac = bootstrap(config(), isa_platform(&tag), isa_drivers()).unwrap();
    let com0 = ac.find("com0").unwrap();
    let sc = ac.softc::<ComSoftc>(com0).unwrap();

    assert_eq!(ac.intr().dispatch(4), Dispatch::Unclaimed { handlers_run: 1 });
    sc.regs.write_1(COM_IIR, 0x04);
    assert_eq!(ac.intr().dispatch(4), Dispatch::Claimed { handlers_run: 1 });
    assert_eq!(sc.interrupts.hits.load(Ordering::SeqCst), 1);
    assert_eq!(ac.intr().count(4), 1);
    assert_eq!(ac.intr().stray(4), 1);
}

#[test]
fn same_descriptor_gives_same_tree() {
    let build = || {
        let tag = isa_tag();
        let pci = pci_tag();
        let t = trace();
        let mut drivers = isa_drivers();
        drivers.register(Hifn { trace: t.clone() });
        let platform = isa_platform(&tag).root(
            "pci",
            AttachArgs::new("mainbus"),
            vec![hifn(&pci, 1, 0x8000_0000, 10), hifn(&pci, 2, 0x8000_4000, 11)],
        );
        bootstrap(config(), platform, drivers).unwrap().tree_names()
    };
    let first = build();
    assert_eq!(first, build());
    assert_eq!(first.len(), 6);
    assert_eq!(first[4], "hifn0 at pci0");
}

#[test]
fn interrupt_source_configuration_is_applied() {
    let tag = isa_tag();
    let platform = isa_platform(&tag).intr_source(
        4,
        SourceConfig {
            trigger: Some(Trigger::Level),
            ceiling: None,
        },
    );
    let ac = bootstrap(config(), platform, isa_drivers()).unwrap();
    // The first UART wants an edge-triggered line on a level source; the second one
    // takes over its unit.
    let com0 = ac.find("com0").unwrap();
    assert_eq!(ac.softc::<ComSoftc>(com0).unwrap().regs.base(), 0x2f8);
    assert!(ac.find("com1").is_none());
    assert_eq!(tag.mappings(), 1);
}

// ─── Matching ───────────────────────────────────────────────────────

#[test]
fn highest_score_wins_and_ties_go_to_first_registered() {
    let mut drivers = DriverTable::new();
    drivers.register(Scored {
        name: "early",
        score: 5,
    });
    drivers.register(Scored {
        name: "late",
        score: 5,
    });
    drivers.register(Scored {
        name: "weak",
        score: 1,
    });
    let mut ac = Autoconf::new(config(), drivers);
    let root = ac.add_root("mainbus", AttachArgs::new("mainbus"));
    let outcomes = ac.probe_bus(root, vec![AttachArgs::new("test")]).unwrap();
    let SlotOutcome::Attached(id) = outcomes[0] else {
        panic!("slot not attached: {:?}", outcomes[0]);
    };
    assert_eq!(ac.xname(id), Some("early0"));

    ac.register_driver(Scored {
        name: "best",
        score: 9,
    });
    let outcomes = ac.probe_bus(root, vec![AttachArgs::new("test")]).unwrap();
    let SlotOutcome::Attached(id) = outcomes[0] else {
        panic!("slot not attached: {:?}", outcomes[0]);
    };
    assert_eq!(ac.xname(id), Some("best0"));
}

#[test]
fn unmatched_slot_is_left_unpopulated() {
    let mut ac = Autoconf::new(config(), DriverTable::new());
    let root = ac.add_root("mainbus", AttachArgs::new("mainbus"));
    let outcomes = ac.probe_bus(root, vec![AttachArgs::new("test")]).unwrap();
    assert_eq!(outcomes, [SlotOutcome::Unconfigured]);
    assert!(ac.children(root).is_empty());
}

// ─── Bridges ────────────────────────────────────────────────────────

#[test]
fn bridge_children_are_probed_after_bridge_attach() {
    let pci = pci_tag();
    let t = trace();
    let mut drivers = DriverTable::new();
    drivers.register(Ppb {
        trace: t.clone(),
        downstream: vec![hifn(&pci, 0, 0x8000_8000, 12)],
    });
    drivers.register(Hifn { trace: t.clone() });
    let platform = Platform::new().root(
        "pci",
        AttachArgs::new("mainbus"),
        vec![hifn(&pci, 1, 0x8000_0000, 10), ppb(2)],
    );
    let ac = bootstrap(config(), platform, drivers).unwrap();

    assert_eq!(
        *t.lock().unwrap(),
        [
            "probe hifn at pci0",
            "attach hifn0",
            "probe hifn at pci0",
            "attach ppb0",
            "probe hifn at ppb0",
            "attach hifn1",
        ]
    );
    let ppb0 = ac.find("ppb0").unwrap();
    let hifn1 = ac.find("hifn1").unwrap();
    assert_eq!(ac.parent(hifn1), Some(ppb0));
    assert_eq!(ac.children(ppb0), [hifn1]);
}

// ─── Failures ───────────────────────────────────────────────────────

#[test]
fn attach_failure_is_local_and_releases_resources() {
    let tag = isa_tag();
    let platform = Platform::new().root(
        "isa",
        AttachArgs::new("mainbus"),
        vec![
            AttachArgs::new("isa").name("stuck").reg(&tag, 0x100, 4),
            com(&tag, 0x3f8, 4),
        ],
    );
    let mut ac = Autoconf::new(config(), isa_drivers());
    let root = ac.add_root(platform.roots[0].name, platform.roots[0].args.clone());
    let outcomes = ac.probe_bus(root, platform.roots[0].children.clone()).unwrap();

    assert_eq!(
        outcomes[0],
        SlotOutcome::Failed {
            driver: "stuck",
            error: Error::HardwareRejected
        }
    );
    assert!(matches!(outcomes[1], SlotOutcome::Attached(_)));
    assert_eq!(tag.mappings(), 1);
    assert!(!tag.extent().is_allocated(0x100, 4));
    assert!(ac.find("stuck0").is_none());
    assert_eq!(ac.find("com0"), Some(ac.children(root)[0]));
}

#[test]
fn mapping_conflict_fails_attach_only() {
    let tag = isa_tag();
    let mut ac = Autoconf::new(config(), isa_drivers());
    let root = ac.add_root("isa", AttachArgs::new("mainbus"));
    let outcomes = ac
        .probe_bus(root, vec![com(&tag, 0x3f8, 4), com(&tag, 0x3fc, 5)])
        .unwrap();
    assert!(matches!(outcomes[0], SlotOutcome::Attached(_)));
    assert_eq!(
        outcomes[1],
        SlotOutcome::Failed {
            driver: "com",
            error: Error::NoSpace
        }
    );
    // The unit of the failed device is free again.
    let outcomes = ac.probe_bus(root, vec![com(&tag, 0x2f8, 3)]).unwrap();
    let SlotOutcome::Attached(id) = outcomes[0] else {
        panic!("slot not attached: {:?}", outcomes[0]);
    };
    assert_eq!(ac.xname(id), Some("com1"));
}

#[test]
fn missing_console_fails_boot() {
    let tag = isa_tag();
    let platform = Platform::new().root(
        "isa",
        AttachArgs::new("mainbus"),
        vec![
            com(&tag, 0x3f8, 4),
            AttachArgs::new("isa")
                .name("pccons")
                .critical(CriticalRole::Console),
        ],
    );
    assert_eq!(
        bootstrap(config(), platform, isa_drivers()).err(),
        Some(Error::CriticalDeviceMissing {
            role: CriticalRole::Console
        })
    );
}

#[test]
fn missing_optional_device_does_not_fail_boot() {
    let tag = isa_tag();
    let platform = Platform::new().root(
        "isa",
        AttachArgs::new("mainbus"),
        vec![
            AttachArgs::new("isa").name("stuck").reg(&tag, 0x100, 4),
            com(&tag, 0x3f8, 4).critical(CriticalRole::Console),
        ],
    );
    assert!(bootstrap(config(), platform, isa_drivers()).is_ok());
}

#[test]
#[should_panic(expected = "Device framework invariant violated")]
fn probing_behind_a_detached_parent_is_fatal() {
    let mut drivers = DriverTable::new();
    drivers.register(Scored {
        name: "dev",
        score: 1,
    });
    let mut ac = Autoconf::new(config(), drivers);
    let root = ac.add_root("mainbus", AttachArgs::new("mainbus"));
    let outcomes = ac.probe_bus(root, vec![AttachArgs::new("test")]).unwrap();
    let SlotOutcome::Attached(dev) = outcomes[0] else {
        panic!("slot not attached");
    };
    ac.detach(dev, DetachFlags::QUIET).unwrap();
    let _ = ac.probe_bus(dev, vec![AttachArgs::new("test")]);
}

// ─── Detach ─────────────────────────────────────────────────────────

#[test]
fn detach_is_lifo_and_releases_everything() {
    let pci = pci_tag();
    let t = trace();
    let mut drivers = DriverTable::new();
    drivers.register(Ppb {
        trace: t.clone(),
        downstream: vec![
            hifn(&pci, 0, 0x8000_8000, 12),
            hifn(&pci, 1, 0x8000_c000, 13),
        ],
    });
    drivers.register(Hifn { trace: t.clone() });
    let platform = Platform::new().root("pci", AttachArgs::new("mainbus"), vec![ppb(2)]);
    let mut ac = bootstrap(config(), platform, drivers).unwrap();
    assert_eq!(pci.mappings(), 4);
    assert_eq!(ac.intr().handlers(13), ["hifn1"]);

    t.lock().unwrap().clear();
    let ppb0 = ac.find("ppb0").unwrap();
    let hifn0 = ac.find("hifn0").unwrap();
    ac.detach(ppb0, DetachFlags::empty()).unwrap();

    assert_eq!(
        *t.lock().unwrap(),
        ["detach hifn1", "detach hifn0", "detach ppb0"]
    );
    assert_eq!(pci.mappings(), 0);
    assert!(pci.extent().regions().is_empty());
    assert!(ac.intr().handlers(12).is_empty());
    assert!(ac.intr().handlers(13).is_empty());
    assert_eq!(ac.state(ppb0), Some(DeviceState::Detached));
    assert_eq!(ac.state(hifn0), Some(DeviceState::Detached));
    assert_eq!(ac.tree_names(), ["pci0"]);
}

#[test]
fn hard_interrupt_hands_off_to_soft_interrupt() {
    let pci = pci_tag();
    let t = trace();
    let mut drivers = DriverTable::new();
    drivers.register(Hifn { trace: t.clone() });
    let platform = Platform::new().root(
        "pci",
        AttachArgs::new("mainbus"),
        vec![hifn(&pci, 0, 0x8000_0000, 12)],
    );
    let mut ac = bootstrap(config(), platform, drivers).unwrap();
    t.lock().unwrap().clear();

    {
        let _guard = ac.intr().spl_raise(0, Ipl::Net);
        assert_eq!(ac.intr().dispatch(12), Dispatch::Deferred);
        assert!(t.lock().unwrap().is_empty());
    }
    assert_eq!(*t.lock().unwrap(), ["softint hifn0"]);
    assert_eq!(ac.intr().count(12), 1);

    let hifn0 = ac.find("hifn0").unwrap();
    ac.detach(hifn0, DetachFlags::empty()).unwrap();
    assert_eq!(ac.intr().dispatch(12), Dispatch::Stray);
    assert_eq!(
        *t.lock().unwrap(),
        ["softint hifn0", "detach hifn0"]
    );
}

#[test]
fn refused_detach_keeps_device_and_ancestors() {
    let mut drivers = DriverTable::new();
    drivers.register(Busy);
    let mut ac = Autoconf::new(config(), drivers);
    let root = ac.add_root("mainbus", AttachArgs::new("mainbus"));
    ac.probe_bus(root, vec![AttachArgs::new("test")]).unwrap();
    let busy0 = ac.find("busy0").unwrap();

    assert_eq!(ac.shutdown(DetachFlags::empty()), Err(Error::Busy));
    assert_eq!(ac.state(busy0), Some(DeviceState::Attached));
    assert_eq!(ac.state(root), Some(DeviceState::Attached));
}

#[test]
#[should_panic(expected = "forced detach refused")]
fn refused_forced_detach_is_fatal() {
    let mut drivers = DriverTable::new();
    drivers.register(Busy);
    let mut ac = Autoconf::new(config(), drivers);
    let root = ac.add_root("mainbus", AttachArgs::new("mainbus"));
    ac.probe_bus(root, vec![AttachArgs::new("test")]).unwrap();
    let _ = ac.detach(root, DetachFlags::FORCE);
}

#[test]
fn shutdown_detaches_every_root() {
    let tag = isa_tag();
    let mut ac = bootstrap(config(), isa_platform(&tag), isa_drivers()).unwrap();
    ac.shutdown(DetachFlags::QUIET).unwrap();
    assert!(ac.tree_names().is_empty());
    assert!(ac.roots().is_empty());
    assert_eq!(tag.mappings(), 0);
    assert_eq!(ac.intr().dispatch(4), Dispatch::Stray);
}

// ─── Hot-plug ───────────────────────────────────────────────────────

#[test]
fn hotplug_events_run_in_order() {
    let tag = isa_tag();
    let mut ac = bootstrap(config(), isa_platform(&tag), isa_drivers()).unwrap();
    let isa0 = ac.find("isa0").unwrap();
    let com1 = ac.find("com1").unwrap();
    let queue = ac.hotplug();

    queue.queue_detach(com1, DetachFlags::empty());
    queue.queue_attach(isa0, com(&tag, 0x3e8, 5));
    queue.queue_detach(com1, DetachFlags::empty());
    assert_eq!(queue.len(), 3);

    let outcomes = ac.run_hotplug();
    assert_eq!(outcomes[0], HotplugOutcome::Detached(Ok(())));
    let HotplugOutcome::Probed(SlotOutcome::Attached(new)) = outcomes[1] else {
        panic!("hot-plugged device not attached: {:?}", outcomes[1]);
    };
    // The freed unit is reused.
    assert_eq!(ac.xname(new), Some("com1"));
    assert_eq!(outcomes[2], HotplugOutcome::Stale);
    assert!(queue.is_empty());
}

// ─── Interrupt cancellation ─────────────────────────────────────────

#[test]
fn disestablish_waits_for_in_flight_dispatch() {
    let table = IntrTable::new(&config());
    struct Probe {
        entered: AtomicU32,
        exited: AtomicU32,
    }
    let probe = Arc::new(Probe {
        entered: AtomicU32::new(0),
        exited: AtomicU32::new(0),
    });
    let token = table
        .establish(
            IntrSpec {
                source: 7,
                trigger: Trigger::Level,
            },
            Ipl::Bio,
            "slow",
            |p: &Probe| {
                p.entered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
                p.exited.fetch_add(1, Ordering::SeqCst);
                Claim::Claimed
            },
            probe.clone(),
        )
        .unwrap();
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            while !stop.load(Ordering::SeqCst) {
                table.dispatch_on(1, 7);
            }
        });
        while probe.entered.load(Ordering::SeqCst) < 3 {
            thread::yield_now();
        }
        table.disestablish(token);
        let entered = probe.entered.load(Ordering::SeqCst);
        assert_eq!(entered, probe.exited.load(Ordering::SeqCst));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(probe.entered.load(Ordering::SeqCst), entered);
        stop.store(true, Ordering::SeqCst);
    });
    assert_eq!(table.dispatch_on(1, 7), Dispatch::Stray);
}
