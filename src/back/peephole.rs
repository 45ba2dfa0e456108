//! The peephole optimizer.
//!
//! Six independent rewriters run in a fixed order, and the whole cycle
//! repeats up to five times or until a cycle makes no rewrite.  Each
//! rewriter takes the item stream and returns the new stream together with
//! its rewrite count; the driver sums the counts into the `optimized`
//! tally.
//!
//! Exported labels (targets of `GLOBAL`) are never aliased or deleted.

use crate::common::Set;

use super::asm::*;

use Operand::*;
use Register::*;

const MAX_PASSES: u32 = 5;

type Pass = fn(Vec<Item>) -> (Vec<Item>, u32);

const PASSES: [Pass; 6] = [labels, globals, jumps, dead_code, replace, frame];

/// Run the full optimizer loop.  Returns the optimized stream and the
/// total number of rewrites.
pub fn optimize(mut code: Vec<Item>) -> (Vec<Item>, u32) {
    let mut total = 0;
    for _ in 0..MAX_PASSES {
        let before = total;
        for pass in PASSES {
            let (next, count) = pass(code);
            code = next;
            total += count;
        }
        if total == before {
            break;
        }
    }
    (code, total)
}

// ----------------------------------------------------------------------
// 1. Labels: alias duplicates, drop the unreferenced.
// ----------------------------------------------------------------------

fn labels(code: Vec<Item>) -> (Vec<Item>, u32) {
    let mut count = 0;

    // Consecutive definitions (comments in between do not matter) name the
    // same position; alias the later ones to the first.
    let mut aliases = crate::common::Map::new();
    let mut canonical: Option<Label> = None;
    for item in &code {
        match item {
            Item::Label { label, global } => match canonical {
                None => canonical = Some(*label),
                Some(first) => {
                    if !*global {
                        aliases.insert(*label, first);
                    }
                }
            },
            Item::Comment(_) => {}
            _ => canonical = None,
        }
    }

    let mut result = Vec::with_capacity(code.len());
    for mut item in code {
        match &mut item {
            Item::Label { label, .. } => {
                if aliases.contains_key(label) {
                    count += 1;
                    continue;
                }
            }
            Item::Code(instruction) => {
                for arg in &mut instruction.args {
                    if let LabelRef(label) = arg {
                        if let Some(target) = aliases.get(label) {
                            *label = *target;
                            count += 1;
                        }
                    }
                }
            }
            _ => {}
        }
        result.push(item);
    }

    // Drop local labels no instruction refers to.
    let mut used = Set::new();
    for item in &result {
        if let Item::Code(instruction) = item {
            for arg in &instruction.args {
                if let LabelRef(label) = arg {
                    used.insert(*label);
                }
            }
        }
    }
    let before = result.len();
    result.retain(
        |item| !matches!(item, Item::Label { label, global: false } if !used.contains(label)),
    );
    count += (before - result.len()) as u32;

    (result, count)
}

// ----------------------------------------------------------------------
// 2. Globals and externs: de-duplicate and hoist to the top.
// ----------------------------------------------------------------------

fn globals(code: Vec<Item>) -> (Vec<Item>, u32) {
    let mut count = 0;
    let mut hoisted = Vec::new();
    let mut externs = Vec::new();
    let mut seen = Set::new();
    let mut rest = Vec::new();

    for item in code {
        match item {
            Item::Directive(Directive::Global(_)) => hoisted.push(item),
            Item::Directive(Directive::Extern(label)) => {
                if seen.insert(label) {
                    externs.push(item);
                } else {
                    count += 1;
                }
            }
            _ => rest.push(item),
        }
    }

    hoisted.extend(externs);
    hoisted.extend(rest);
    (hoisted, count)
}

// ----------------------------------------------------------------------
// 3. Jumps: unreachable tails and jumps to the next label.
// ----------------------------------------------------------------------

fn jumps(code: Vec<Item>) -> (Vec<Item>, u32) {
    let mut count = 0;

    // (a) everything between an unconditional jump and the next label is
    // unreachable
    let mut result = Vec::with_capacity(code.len());
    let mut skipping = false;
    for item in code {
        match &item {
            Item::Label { .. } => skipping = false,
            _ if skipping => {
                count += 1;
                continue;
            }
            Item::Code(instruction) if instruction.op == Op::Jmp => skipping = true,
            _ => {}
        }
        result.push(item);
    }

    // (b) a jump to the label defined immediately after it is a no-op
    let mut pending: Option<(usize, Label)> = None;
    let mut dropped = Set::new();
    for (index, item) in result.iter().enumerate() {
        match item {
            Item::Label { label, .. } => {
                if let Some((jump, target)) = pending {
                    if target == *label {
                        dropped.insert(jump);
                        count += 1;
                    }
                }
                pending = None;
            }
            Item::Code(instruction) => {
                pending = match (instruction.op, instruction.args.first()) {
                    (Op::Jmp, Some(LabelRef(target))) => Some((index, *target)),
                    _ => None,
                };
            }
            _ => {}
        }
    }

    (drop_indices(result, &dropped), count)
}

// ----------------------------------------------------------------------
// 4. Dead code: identity arithmetic, store/load pairs, dead eax stores.
// ----------------------------------------------------------------------

fn dead_code(code: Vec<Item>) -> (Vec<Item>, u32) {
    let mut count = 0;
    let code = drop_identities(code, &mut count);
    let code = drop_store_load_pairs(code, &mut count);
    let code = drop_dead_eax_stores(code, &mut count);
    (code, count)
}

/// `add r, 0`, `sub r, 0` and `imul r, 1` do nothing.
fn drop_identities(code: Vec<Item>, count: &mut u32) -> Vec<Item> {
    code.into_iter()
        .filter(|item| {
            if let Item::Code(instruction) = item {
                let deletable = matches!(
                    (instruction.op, instruction.args.get(1)),
                    (Op::Add | Op::Sub, Some(Imm(0))) | (Op::Imul, Some(Imm(1)))
                );
                if deletable {
                    *count += 1;
                    return false;
                }
            }
            true
        })
        .collect()
}

/// A store to memory followed directly by a load of the same address back
/// into `eax` is a round trip; both instructions go.
fn drop_store_load_pairs(code: Vec<Item>, count: &mut u32) -> Vec<Item> {
    let mut dropped = Set::new();
    let mut store: Option<(usize, Operand)> = None;

    for (index, item) in code.iter().enumerate() {
        match item {
            Item::Comment(_) => {}
            Item::Code(instruction) if instruction.op == Op::Mov => {
                let dst = instruction.args.first().copied();
                let src = instruction.args.get(1).copied();
                match (dst, src) {
                    (Some(address), Some(Reg(Eax)))
                        if matches!(address, Mem { .. } | Data(_)) =>
                    {
                        store = Some((index, address));
                    }
                    (Some(Reg(Eax)), Some(address))
                        if store.is_some_and(|(_, stored)| stored == address) =>
                    {
                        if let Some((stored_index, _)) = store {
                            dropped.insert(stored_index);
                            dropped.insert(index);
                            *count += 1;
                        }
                        store = None;
                    }
                    _ => store = None,
                }
            }
            _ => store = None,
        }
    }

    drop_indices(code, &dropped)
}

/// Writes to `eax` that are overwritten before anything reads them.
///
/// Labels reset the tracking: a store that reaches a label may be consumed
/// by a jump to it.  A `call` clobbers `eax` like any other write but is
/// never itself a candidate for deletion.
fn drop_dead_eax_stores(code: Vec<Item>, count: &mut u32) -> Vec<Item> {
    let mut dropped = Set::new();
    let mut pending: Option<usize> = None;

    for (index, item) in code.iter().enumerate() {
        match item {
            Item::Label { .. } => pending = None,
            Item::Code(instruction) => {
                if reads_eax(instruction) {
                    pending = None;
                } else if writes_eax(instruction) {
                    if let Some(previous) = pending {
                        dropped.insert(previous);
                        *count += 1;
                    }
                    pending = (instruction.op != Op::Call).then_some(index);
                }
            }
            _ => {}
        }
    }

    drop_indices(code, &dropped)
}

fn reads_eax(instruction: &Instruction) -> bool {
    match instruction.op {
        Op::Cdq | Op::Idiv | Op::Ret => true,
        // movzx eax, al consumes the low byte of eax
        Op::Movzx => matches!(instruction.args.get(1), Some(Reg(Al) | Reg(Eax))),
        Op::Mov => matches!(instruction.args.get(1), Some(Reg(Eax))),
        Op::Add | Op::Sub | Op::Imul | Op::Cmp | Op::Inc | Op::Dec | Op::Neg | Op::Xor => {
            instruction.args.iter().any(|arg| matches!(arg, Reg(Eax)))
        }
        // a pushed eax is consumed by whoever pops the stack
        Op::Push => matches!(instruction.args.first(), Some(Reg(Eax))),
        Op::Pop | Op::Set(_) | Op::Je | Op::Jmp | Op::Call => false,
    }
}

fn writes_eax(instruction: &Instruction) -> bool {
    match instruction.op {
        Op::Cdq | Op::Idiv | Op::Call => true,
        Op::Set(_) => matches!(instruction.args.first(), Some(Reg(Al))),
        Op::Add
        | Op::Sub
        | Op::Imul
        | Op::Inc
        | Op::Dec
        | Op::Neg
        | Op::Xor
        | Op::Mov
        | Op::Movzx
        | Op::Pop => matches!(instruction.args.first(), Some(Reg(Eax))),
        Op::Cmp | Op::Push | Op::Je | Op::Jmp | Op::Ret => false,
    }
}

// ----------------------------------------------------------------------
// 5. Strength replacements.
// ----------------------------------------------------------------------

fn replace(mut code: Vec<Item>) -> (Vec<Item>, u32) {
    let mut count = 0;
    for item in &mut code {
        let Item::Code(instruction) = item else {
            continue;
        };
        match (
            instruction.op,
            instruction.args.first().copied(),
            instruction.args.get(1).copied(),
        ) {
            (Op::Mov, Some(Reg(register)), Some(Imm(0))) => {
                instruction.op = Op::Xor;
                instruction.args[1] = Reg(register);
                annotate(instruction, "(Optimized mov -> xor)");
                count += 1;
            }
            (Op::Imul, _, Some(Imm(0))) => {
                instruction.op = Op::Mov;
                instruction.args[1] = Imm(0);
                annotate(instruction, "(Optimized imul -> mov)");
                count += 1;
            }
            (Op::Inc, _, _) => {
                instruction.op = Op::Add;
                instruction.args.push(Imm(1));
                annotate(instruction, "(Optimized inc -> add)");
                count += 1;
            }
            (Op::Dec, _, _) => {
                instruction.op = Op::Sub;
                instruction.args.push(Imm(1));
                annotate(instruction, "(Optimized dec -> sub)");
                count += 1;
            }
            _ => {}
        }
    }
    (code, count)
}

fn annotate(instruction: &mut Instruction, note: &str) {
    instruction.comment = Some(match instruction.comment.take() {
        Some(comment) => format!("{comment} {note}"),
        None => note.to_string(),
    });
}

// ----------------------------------------------------------------------
// 6. Frame pointer elimination.
// ----------------------------------------------------------------------

struct Window {
    start: usize,
    size: i32,
    end: usize,
}

/// In a function whose body pushes nothing, `esp` never moves after the
/// prologue, so `ebp` is redundant: every `[ebp+k]` can address through
/// `esp` instead and the prologue/epilogue bookkeeping disappears.
fn frame(mut code: Vec<Item>) -> (Vec<Item>, u32) {
    let mut count = 0;
    let mut windows: Vec<Window> = Vec::new();
    let mut start: Option<usize> = None;
    let mut size = 0;

    for (index, item) in code.iter().enumerate() {
        let Item::Code(instruction) = item else {
            continue;
        };
        if instruction.op == Op::Push && instruction.args.first() == Some(&Reg(Ebp)) {
            start = Some(index);
            size = 0;
            continue;
        }
        let Some(begin) = start else {
            continue;
        };
        if index == begin + 1 {
            if !(instruction.op == Op::Mov && instruction.args == [Reg(Ebp), Reg(Esp)]) {
                start = None;
            }
            continue;
        }
        if index == begin + 2 && instruction.op == Op::Sub {
            if instruction.args.first() == Some(&Reg(Esp)) {
                if let Some(Imm(bytes)) = instruction.args.get(1) {
                    size = *bytes;
                }
                continue;
            }
        }
        if instruction.op == Op::Push {
            // the body moves esp; leave this function alone
            start = None;
        } else if instruction.op == Op::Pop && instruction.args.first() == Some(&Reg(Ebp)) {
            let restores_esp = index > 0
                && matches!(
                    &code[index - 1],
                    Item::Code(previous)
                        if previous.op == Op::Mov && previous.args == [Reg(Esp), Reg(Ebp)]
                );
            if restores_esp {
                windows.push(Window {
                    start: begin,
                    size,
                    end: index,
                });
            }
            start = None;
        }
    }

    let mut dropped = Set::new();
    for window in &windows {
        count += 1;
        for index in window.start..=window.end {
            if let Item::Code(instruction) = &mut code[index] {
                for arg in &mut instruction.args {
                    if let Mem { base: Ebp, offset } = *arg {
                        *arg = Mem {
                            base: Esp,
                            offset: window.size + offset - 4,
                        };
                    }
                }
            }
        }
        // drop `push ebp`, `mov ebp, esp`, `mov esp, ebp`; the `pop ebp`
        // site becomes the stack release
        dropped.insert(window.start);
        dropped.insert(window.start + 1);
        dropped.insert(window.end - 1);
        code[window.end] = Item::Code(Instruction::with_comment(
            Op::Add,
            vec![Reg(Esp), Imm(window.size)],
            "Optimized ebp -> esp",
        ));
    }

    (drop_indices(code, &dropped), count)
}

fn drop_indices(code: Vec<Item>, indices: &Set<usize>) -> Vec<Item> {
    code.into_iter()
        .enumerate()
        .filter_map(|(index, item)| (!indices.contains(&index)).then_some(item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(op: Op, args: Vec<Operand>) -> Item {
        Item::Code(Instruction::new(op, args))
    }

    fn local(name: &str) -> Item {
        Item::Label {
            label: Label::named(name),
            global: false,
        }
    }

    #[test]
    fn consecutive_labels_collapse_onto_the_first() {
        let items = vec![
            local("a"),
            local("b"),
            code(Op::Jmp, vec![LabelRef(Label::named("b"))]),
        ];
        let (optimized, count) = labels(items);
        // one definition dropped, one operand rewritten
        assert_eq!(count, 2);
        assert_eq!(optimized[0], local("a"));
        assert_eq!(optimized[1], code(Op::Jmp, vec![LabelRef(Label::named("a"))]));
    }

    #[test]
    fn exported_labels_are_neither_aliased_nor_dropped() {
        let items = vec![
            local("a"),
            Item::Label {
                label: Label::named("_main"),
                global: true,
            },
            code(Op::Jmp, vec![LabelRef(Label::named("a"))]),
        ];
        let (optimized, _) = labels(items);
        assert!(optimized.contains(&Item::Label {
            label: Label::named("_main"),
            global: true,
        }));
    }

    #[test]
    fn unreferenced_local_labels_are_removed() {
        let items = vec![local("never"), code(Op::Ret, vec![])];
        let (optimized, count) = labels(items);
        assert_eq!(count, 1);
        assert_eq!(optimized, vec![code(Op::Ret, vec![])]);
    }

    #[test]
    fn externs_are_deduplicated_and_hoisted_with_globals() {
        let f = Label::named("_f");
        let main = Label::named("_main");
        let items = vec![
            code(Op::Ret, vec![]),
            Item::Directive(Directive::Extern(f)),
            Item::Directive(Directive::Extern(f)),
            Item::Directive(Directive::Global(main)),
        ];
        let (optimized, count) = globals(items);
        assert_eq!(count, 1);
        assert_eq!(
            optimized,
            vec![
                Item::Directive(Directive::Global(main)),
                Item::Directive(Directive::Extern(f)),
                code(Op::Ret, vec![]),
            ]
        );
    }

    #[test]
    fn code_after_an_unconditional_jump_is_unreachable() {
        let items = vec![
            code(Op::Jmp, vec![LabelRef(Label::named("out"))]),
            code(Op::Mov, vec![Reg(Eax), Imm(1)]),
            local("out"),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = jumps(items);
        assert_eq!(count, 1);
        assert_eq!(optimized.len(), 3);
    }

    #[test]
    fn a_jump_to_the_next_label_is_dropped() {
        let items = vec![
            code(Op::Jmp, vec![LabelRef(Label::named("next"))]),
            local("next"),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = jumps(items);
        assert_eq!(count, 1);
        assert_eq!(optimized[0], local("next"));
    }

    #[test]
    fn identity_arithmetic_is_removed() {
        let items = vec![
            code(Op::Add, vec![Reg(Esp), Imm(0)]),
            code(Op::Sub, vec![Reg(Esp), Imm(0)]),
            code(Op::Imul, vec![Reg(Eax), Imm(1)]),
            code(Op::Add, vec![Reg(Esp), Imm(4)]),
        ];
        let (optimized, count) = dead_code(items);
        assert_eq!(count, 3);
        assert_eq!(optimized, vec![code(Op::Add, vec![Reg(Esp), Imm(4)])]);
    }

    #[test]
    fn a_store_load_round_trip_disappears() {
        let slot = Mem {
            base: Ebp,
            offset: -4,
        };
        let items = vec![
            code(Op::Mov, vec![slot, Reg(Eax)]),
            code(Op::Mov, vec![Reg(Eax), slot]),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = dead_code(items);
        assert_eq!(count, 1);
        assert_eq!(optimized, vec![code(Op::Ret, vec![])]);
    }

    #[test]
    fn a_store_load_pair_with_different_addresses_survives() {
        let a = Mem {
            base: Ebp,
            offset: -4,
        };
        let b = Mem {
            base: Ebp,
            offset: -8,
        };
        let items = vec![
            code(Op::Mov, vec![a, Reg(Eax)]),
            code(Op::Mov, vec![Reg(Eax), b]),
            code(Op::Ret, vec![]),
        ];
        let (optimized, _) = dead_code(items);
        assert_eq!(optimized.len(), 3);
    }

    #[test]
    fn an_overwritten_eax_store_is_dead() {
        let items = vec![
            code(Op::Mov, vec![Reg(Eax), Imm(1)]),
            code(Op::Mov, vec![Reg(Eax), Imm(2)]),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = dead_code(items);
        assert_eq!(count, 1);
        assert_eq!(optimized[0], code(Op::Mov, vec![Reg(Eax), Imm(2)]));
    }

    #[test]
    fn a_store_feeding_push_eax_is_live() {
        let items = vec![
            code(Op::Mov, vec![Reg(Eax), Imm(1)]),
            code(Op::Push, vec![Reg(Eax)]),
            code(Op::Call, vec![LabelRef(Label::named("_f"))]),
            code(Op::Mov, vec![Reg(Eax), Imm(2)]),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = dead_code(items);
        assert_eq!(count, 0);
        assert_eq!(optimized.len(), 5);
    }

    #[test]
    fn a_store_reaching_a_label_is_live() {
        let items = vec![
            code(Op::Mov, vec![Reg(Eax), Imm(1)]),
            local("join"),
            code(Op::Mov, vec![Reg(Eax), Imm(2)]),
            code(Op::Ret, vec![]),
        ];
        let (_, count) = dead_code(items);
        assert_eq!(count, 0);
    }

    #[test]
    fn calls_clobber_but_are_never_deleted() {
        let items = vec![
            code(Op::Mov, vec![Reg(Eax), Imm(1)]),
            code(Op::Call, vec![LabelRef(Label::named("_f"))]),
            code(Op::Mov, vec![Reg(Eax), Imm(2)]),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = dead_code(items);
        // the first store dies against the call; the call stays
        assert_eq!(count, 1);
        assert_eq!(
            optimized[0],
            code(Op::Call, vec![LabelRef(Label::named("_f"))])
        );
    }

    #[test]
    fn mov_zero_becomes_xor() {
        let items = vec![code(Op::Mov, vec![Reg(Eax), Imm(0)])];
        let (optimized, count) = replace(items);
        assert_eq!(count, 1);
        let Item::Code(instruction) = &optimized[0] else {
            panic!("expected an instruction");
        };
        assert_eq!(instruction.op, Op::Xor);
        assert_eq!(instruction.args, vec![Reg(Eax), Reg(Eax)]);
    }

    #[test]
    fn mov_zero_to_memory_is_left_alone() {
        let slot = Mem {
            base: Ebp,
            offset: -4,
        };
        let items = vec![code(Op::Mov, vec![slot, Imm(0)])];
        let (optimized, count) = replace(items);
        assert_eq!(count, 0);
        assert_eq!(optimized, vec![code(Op::Mov, vec![slot, Imm(0)])]);
    }

    #[test]
    fn inc_and_dec_become_add_and_sub() {
        let items = vec![
            code(Op::Inc, vec![Reg(Eax)]),
            code(Op::Dec, vec![Reg(Eax)]),
        ];
        let (optimized, count) = replace(items);
        assert_eq!(count, 2);
        let ops: Vec<Op> = optimized
            .iter()
            .map(|item| match item {
                Item::Code(instruction) => instruction.op,
                _ => panic!("expected an instruction"),
            })
            .collect();
        assert_eq!(ops, vec![Op::Add, Op::Sub]);
    }

    #[test]
    fn frame_pointer_is_eliminated_in_push_free_functions() {
        let items = vec![
            code(Op::Push, vec![Reg(Ebp)]),
            code(Op::Mov, vec![Reg(Ebp), Reg(Esp)]),
            code(Op::Sub, vec![Reg(Esp), Imm(8)]),
            code(
                Op::Mov,
                vec![
                    Reg(Eax),
                    Mem {
                        base: Ebp,
                        offset: 8,
                    },
                ],
            ),
            code(Op::Mov, vec![Reg(Esp), Reg(Ebp)]),
            code(Op::Pop, vec![Reg(Ebp)]),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = frame(items);
        assert_eq!(count, 1);
        assert_eq!(
            optimized,
            vec![
                code(Op::Sub, vec![Reg(Esp), Imm(8)]),
                code(
                    Op::Mov,
                    vec![
                        Reg(Eax),
                        Mem {
                            base: Esp,
                            offset: 12,
                        },
                    ],
                ),
                Item::Code(Instruction::with_comment(
                    Op::Add,
                    vec![Reg(Esp), Imm(8)],
                    "Optimized ebp -> esp",
                )),
                code(Op::Ret, vec![]),
            ]
        );
    }

    #[test]
    fn functions_that_push_keep_their_frame_pointer() {
        let items = vec![
            code(Op::Push, vec![Reg(Ebp)]),
            code(Op::Mov, vec![Reg(Ebp), Reg(Esp)]),
            code(Op::Sub, vec![Reg(Esp), Imm(4)]),
            code(Op::Push, vec![Imm(1)]),
            code(Op::Call, vec![LabelRef(Label::named("_f"))]),
            code(Op::Add, vec![Reg(Esp), Imm(4)]),
            code(Op::Mov, vec![Reg(Esp), Reg(Ebp)]),
            code(Op::Pop, vec![Reg(Ebp)]),
            code(Op::Ret, vec![]),
        ];
        let (optimized, count) = frame(items.clone());
        assert_eq!(count, 0);
        assert_eq!(optimized, items);
    }
}
