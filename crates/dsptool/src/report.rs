use comfy_table::{
    Cell, CellAlignment, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};
use dspcore::{Core, PC_INDEX};
use dspint::Reg;

fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).set_alignment(CellAlignment::Center))
                .collect::<Vec<_>>(),
        );

    table
}

/// Prints the registers, four per row.
pub fn registers(core: &Core) {
    let mut regs = table(&["Register", "Value"].repeat(4));

    let mut cells = (0..32)
        .map(|i| {
            let value = core.read_register(i).unwrap_or_default();
            (format!("${}", Reg::new(i).name()), format!("{value:04X}"))
        })
        .collect::<Vec<_>>();

    let pc = core.read_register(PC_INDEX).unwrap_or_default();
    cells.push(("pc".to_owned(), format!("{pc:04X}")));

    for chunk in cells.chunks(4) {
        regs.add_row(chunk.iter().flat_map(|(name, value)| {
            [
                Cell::new(name),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]
        }));
    }

    println!("{regs}");
}

/// Prints the mails sent by the DSP, with the cycle they were seen at.
pub fn mails(mails: &[(u64, u32)]) {
    if mails.is_empty() {
        println!("no mail from the DSP");
        return;
    }

    let mut table = table(&["Step", "Mail"]);
    for (step, mail) in mails {
        table.add_row(vec![
            Cell::new(step).set_alignment(CellAlignment::Right),
            Cell::new(format!("{mail:08X}")),
        ]);
    }

    println!("{table}");
}
