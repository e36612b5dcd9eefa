use dspint::{Dsp, RamHost, hw::ifx, regs::StackId};

fn load(dsp: &mut Dsp, addr: usize, code: &[u16]) {
    {
        let mut iram = dsp.mem.iram.unprotect().unwrap();
        iram[addr..addr + code.len()].copy_from_slice(code);
    }

    dsp.analyze_all();
}

/// Uploads `code` from host address 0x40 to IRAM through a DMA.
fn upload(dsp: &mut Dsp, host: &mut RamHost, dsp_addr: u16, code: &[u8]) {
    host.ram[0x40..][..code.len()].copy_from_slice(code);

    dsp.ifx_write(host, ifx::DSMAH, 0);
    dsp.ifx_write(host, ifx::DSMAL, 0x40);
    dsp.ifx_write(host, ifx::DSPA, dsp_addr);
    dsp.ifx_write(host, ifx::DSCR, 0b10);
    dsp.ifx_write(host, ifx::DSBL, code.len() as u16);
}

#[test]
fn mailbox_echo() {
    let mut dsp = Dsp::new().unwrap();
    let mut host = RamHost::new(0, 0);

    #[rustfmt::skip]
    let code = [
        0x00DE, 0xFFFE, // lr $ac0.m, @CMBH
        0x02C0, 0x8000, // andcf $ac0.m, #0x8000
        0x029C, 0x0000, // jlnz 0x0000
        0x00DE, 0xFFFF, // lr $ac0.m, @CMBL
        0x7400,         // incm $ac0
        0x16FC, 0xDCD1, // si @DMBH, #0xDCD1
        0x00FE, 0xFFFD, // sr @DMBL, $ac0.m
        0x0021,         // halt
    ];
    load(&mut dsp, 0, &code);

    // no mail yet: the poll loop is detected and the budget is forfeited
    assert_eq!(dsp.run_cycles(&mut host, 10_000), 0);
    assert!(!dsp.halted());
    assert!(dsp.step_counter < 32);

    let shared = dsp.hw.shared().clone();
    shared.cpu_mailbox.send(0x8000_0041);
    dsp.run_cycles(&mut host, 10_000);

    assert!(dsp.halted());
    assert!(!shared.cpu_mailbox.has_mail());
    assert!(shared.dsp_mailbox.has_mail());
    assert_eq!(shared.dsp_mailbox.read_high(), 0xDCD1);
    assert_eq!(shared.dsp_mailbox.read_low(), 0x0042);
    assert!(!shared.dsp_mailbox.has_mail());
}

#[test]
fn uploaded_block_loop() {
    let mut dsp = Dsp::new().unwrap();
    let mut host = RamHost::new(0x100, 0);

    #[rustfmt::skip]
    let code = [
        0x11, 0x04, 0x00, 0x23, // bloopi #4, 0x0023
        0x76, 0x00,             // inc $ac0
        0x77, 0x00,             // inc $ac1
        0x00, 0x21,             // halt
    ];
    upload(&mut dsp, &mut host, 0x20, &code);

    assert_eq!(host.uploads, [(0x20, 5)]);
    assert!(dsp.hw.code_changed);
    assert!(dsp.analysis.flags(0x23).loop_end());

    dsp.regs.pc = 0x20;
    dsp.run_cycles_plain(&mut host, 100);

    assert!(dsp.halted());
    assert_eq!(dsp.regs.pc, 0x24);
    assert_eq!(dsp.regs.acc40[0].get(), 4);
    assert_eq!(dsp.regs.acc40[1].get(), 4);
    for id in [StackId::Call, StackId::LoopAddr, StackId::LoopCount] {
        assert!(dsp.regs.stack(id).is_empty());
    }
}

#[test]
fn upload_address_wraps_into_iram() {
    let mut dsp = Dsp::new().unwrap();
    let mut host = RamHost::new(0x100, 0);

    #[rustfmt::skip]
    let code = [
        0x11, 0x04, 0x00, 0x13, // bloopi #4, 0x0013
        0x76, 0x00,             // inc $ac0
        0x77, 0x00,             // inc $ac1
        0x00, 0x21,             // halt
    ];
    upload(&mut dsp, &mut host, 0x1010, &code);

    assert_eq!(host.uploads, [(0x10, 5)]);
    assert_eq!(dsp.mem.iram.as_slice()[0x10], 0x1104);
    assert!(dsp.analysis.flags(0x10).start_of_inst());
    assert!(dsp.analysis.flags(0x13).loop_end());

    dsp.regs.pc = 0x10;
    dsp.run_cycles_plain(&mut host, 100);

    assert!(dsp.halted());
    assert_eq!(dsp.regs.pc, 0x14);
    assert_eq!(dsp.regs.acc40[0].get(), 4);
    assert_eq!(dsp.regs.acc40[1].get(), 4);
}

#[test]
fn upload_across_the_end_of_iram() {
    let mut dsp = Dsp::new().unwrap();
    let mut host = RamHost::new(0x100, 0);

    #[rustfmt::skip]
    let code = [
        0x02, 0x9F, 0x00, 0x00, // 0FFE: jmp 0x0000
        0x11, 0x04, 0x00, 0x03, // 0000: bloopi #4, 0x0003
        0x76, 0x00,             // 0002: inc $ac0
        0x77, 0x00,             // 0003: inc $ac1
        0x00, 0x21,             // 0004: halt
    ];
    upload(&mut dsp, &mut host, 0x0FFE, &code);

    assert_eq!(host.uploads, [(0x0FFE, 7)]);
    assert_eq!(dsp.mem.iram.as_slice()[0x0FFE], 0x029F);
    assert_eq!(dsp.mem.iram.as_slice()[0], 0x1104);
    assert!(dsp.analysis.flags(0x0FFE).start_of_inst());
    assert!(dsp.analysis.flags(0x0000).start_of_inst());
    assert!(dsp.analysis.flags(0x0003).loop_end());

    dsp.regs.pc = 0x0FFE;
    dsp.run_cycles_plain(&mut host, 100);

    assert!(dsp.halted());
    assert_eq!(dsp.regs.pc, 0x0004);
    assert_eq!(dsp.regs.acc40[0].get(), 4);
    assert_eq!(dsp.regs.acc40[1].get(), 4);
}

#[test]
fn external_interrupt_round_trip() {
    let mut dsp = Dsp::new().unwrap();
    let mut host = RamHost::new(0, 0);

    load(&mut dsp, 0, &[0x029F, 0x0000]); // jmp 0x0000
    #[rustfmt::skip]
    let handler = [
        0x0098, 0x5A5A, // lri $ax0.l, #0x5A5A
        0x02FF,         // rti
    ];
    load(&mut dsp, 14, &handler);

    dsp.regs.status.set_external_interrupt_enable(true);
    dsp.hw.shared().request_external_interrupt();
    dsp.run_cycles_plain(&mut host, 20);

    assert_eq!(dsp.regs.acc32[0], 0x5A5A);
    assert!(dsp.regs.status.external_interrupt_enable());
    assert!(dsp.regs.stack(StackId::Call).is_empty());
    assert!(dsp.regs.stack(StackId::Data).is_empty());
    assert_eq!(dsp.exceptions, 0);
}
