//! Code generation: lower the parsed AST into NASM x86-64 assembly.
//!
//! The emitter uses a simple stack machine: every expression leaves a
//! single value on the machine stack and consumers pop their operands.
//! Variables are nothing more than stack slots remembered by position, so
//! `stack_depth` has to mirror every push and pop the emitted code will
//! perform. Output accumulates in three buffers – `.data`, `.bss` and
//! `.text` – which are concatenated with a fixed runtime at the end.

use tracing::debug;

use crate::config::PRINT_BUFFER_SIZE;
use crate::error::{
  CompileResult, VariableAlreadyDeclaredSnafu, VariableNotDeclaredSnafu, VariableNotMutableSnafu,
};
use crate::parser::{BinOp, Expr, IfBranch, PrintArg, Prog, Scope, Stmt, Term};

/// Emit a complete assembly source for a program.
pub(crate) fn generate(prog: &Prog) -> CompileResult<String> {
  Generator::new().run(prog)
}

/// A declared variable: its value lives in the stack slot that was pushed
/// by its `let`.
struct Variable {
  name: String,
  is_mutable: bool,
  stack_slot: usize,
  scope_index: usize,
}

struct Generator {
  data: String,
  bss: String,
  text: String,
  /// 8-byte slots currently pushed, relative to the frame baseline.
  stack_depth: usize,
  vars: Vec<Variable>,
  /// `vars.len()` at each scope entry; the last entry delimits the
  /// innermost scope.
  scope_frames: Vec<usize>,
  label_counter: usize,
  string_counter: usize,
}

impl Generator {
  fn new() -> Self {
    Self {
      data: "section .data\nnewline db 10\n".to_string(),
      bss: format!("section .bss\nprint_buffer resb {PRINT_BUFFER_SIZE}\nbuffer_used resq 1\n"),
      text: "section .text\nglobal _start\n\n_start:\n    call initialize_buffer\n".to_string(),
      stack_depth: 0,
      vars: Vec::new(),
      scope_frames: Vec::new(),
      label_counter: 0,
      string_counter: 0,
    }
  }

  fn run(mut self, prog: &Prog) -> CompileResult<String> {
    for stmt in &prog.stmts {
      self.gen_stmt(stmt)?;
    }

    // A program that does not end in `exit` drains the print buffer and
    // exits 0 on its own.
    if !matches!(prog.stmts.last(), Some(Stmt::Exit(_))) {
      self.emit("call print_chars");
      self.emit("mov rdi, 0");
      self.emit("mov rax, 60");
      self.emit("syscall");
    }

    debug!(
      data = self.data.len(),
      bss = self.bss.len(),
      text = self.text.len(),
      "generation complete"
    );

    let mut output = String::new();
    output.push_str(&self.data);
    output.push('\n');
    output.push_str(&self.bss);
    output.push('\n');
    output.push_str(&self.text);
    output.push('\n');
    output.push_str(&runtime_trailer());
    Ok(output)
  }

  // ----- Statement lowering -----

  fn gen_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
      Stmt::Exit(expr) => {
        self.gen_expr(expr)?;
        self.emit("call flush_buffer");
        self.emit("mov rax, 60");
        self.pop("rdi");
        self.emit("syscall");
      }
      Stmt::Print(PrintArg::Expr(expr)) => {
        // The printed value stays on the stack; stack_depth already counts
        // it from the expression push.
        self.gen_expr(expr)?;
        self.emit("mov rsi, QWORD [rsp]");
        self.emit("call print_int");
        self.emit("call print_newline");
      }
      Stmt::Print(PrintArg::String(string)) => {
        let name = format!("string{}", self.string_counter);
        self.string_counter += 1;

        let mut db = String::new();
        for (i, segment) in string.value.split('\n').enumerate() {
          if i > 0 {
            db.push_str(", 10, ");
          }
          db.push('\'');
          db.push_str(segment);
          db.push('\'');
        }
        self.data.push_str(&format!("{name} db {db}, 0\n"));
        self
          .data
          .push_str(&format!("{name}_len equ {}\n", string.value.len() + 1));

        self.emit(&format!("lea rsi, [{name}]"));
        self.emit(&format!("mov rcx, {name}_len"));
        self.emit("call check_and_add_to_buffer");
      }
      Stmt::Let {
        ident,
        expr,
        is_mutable,
      } => {
        let scope_index = self.scope_frames.len();
        let already = self
          .vars
          .iter()
          .any(|v| v.name == ident.value && v.scope_index == scope_index);
        if already {
          return VariableAlreadyDeclaredSnafu {
            location: ident.location(),
          }
          .fail();
        }
        // The initialiser's push is the variable's storage, so the slot is
        // recorded before lowering it.
        self.vars.push(Variable {
          name: ident.value.clone(),
          is_mutable: *is_mutable,
          stack_slot: self.stack_depth,
          scope_index,
        });
        self.gen_expr(expr)?;
      }
      Stmt::Assign { ident, expr } => {
        let Some((stack_slot, is_mutable)) = self
          .vars
          .iter()
          .find(|v| v.name == ident.value)
          .map(|v| (v.stack_slot, v.is_mutable))
        else {
          return VariableNotDeclaredSnafu {
            name: ident.value.clone(),
            location: ident.location(),
          }
          .fail();
        };
        if !is_mutable {
          return VariableNotMutableSnafu {
            location: ident.location(),
          }
          .fail();
        }
        self.gen_expr(expr)?;
        self.pop("rax");
        let offset = self.slot_offset(stack_slot);
        self.emit(&format!("mov QWORD [rsp + {offset}], rax"));
      }
      Stmt::Scope(scope) => self.gen_scope(scope)?,
      Stmt::If {
        branch,
        elifs,
        else_scope,
      } => self.gen_if(branch, elifs, else_scope.as_ref())?,
    }
    Ok(())
  }

  fn gen_scope(&mut self, scope: &Scope) -> CompileResult<()> {
    self.scope_frames.push(self.vars.len());
    for stmt in &scope.stmts {
      self.gen_stmt(stmt)?;
    }
    let frame = self.scope_frames.pop().unwrap_or(0);

    // Discard every slot the scope declared.
    let popped = self.vars.len() - frame;
    if popped > 0 {
      self.emit(&format!("add rsp, {}", popped * 8));
      self.stack_depth -= popped;
      self.vars.truncate(frame);
    }
    Ok(())
  }

  fn gen_if(
    &mut self,
    branch: &IfBranch,
    elifs: &[IfBranch],
    else_scope: Option<&Scope>,
  ) -> CompileResult<()> {
    let end_label = self.new_label();

    let mut false_label = self.new_label();
    self.gen_branch(branch, &false_label, &end_label)?;

    for elif in elifs {
      false_label = self.new_label();
      self.gen_branch(elif, &false_label, &end_label)?;
    }

    if let Some(scope) = else_scope {
      self.gen_scope(scope)?;
    }

    self.label(&end_label);
    Ok(())
  }

  /// One conditional arm: test, jump past on false, body, jump to the end.
  fn gen_branch(
    &mut self,
    branch: &IfBranch,
    false_label: &str,
    end_label: &str,
  ) -> CompileResult<()> {
    self.gen_expr(&branch.cond)?;
    self.pop("rax");
    self.emit("test rax, rax");
    self.emit(&format!("jz {false_label}"));
    self.gen_scope(&branch.scope)?;
    self.emit(&format!("jmp {end_label}"));
    self.label(false_label);
    Ok(())
  }

  // ----- Expression lowering -----

  fn gen_expr(&mut self, expr: &Expr) -> CompileResult<()> {
    match expr {
      Expr::Term(term) => self.gen_term(term)?,
      Expr::Binary { op, left, right } => match op {
        // Operand order per operator is load-bearing: each pop sequence
        // must land the operands in the registers the instruction wants.
        BinOp::Add => {
          self.gen_expr(right)?;
          self.gen_expr(left)?;
          self.pop("rax");
          self.pop("rbx");
          self.emit("add rax, rbx");
          self.push("rax");
        }
        BinOp::Sub => {
          self.gen_expr(right)?;
          self.gen_expr(left)?;
          self.pop("rax");
          self.pop("rbx");
          self.emit("sub rax, rbx");
          self.push("rax");
        }
        BinOp::Mul => {
          self.gen_expr(left)?;
          self.gen_expr(right)?;
          self.pop("rax");
          self.pop("rbx");
          self.emit("xor rdx, rdx");
          self.emit("mul rbx");
          self.push("rax");
        }
        BinOp::Div => {
          self.gen_expr(left)?;
          self.gen_expr(right)?;
          self.pop("rbx");
          self.pop("rax");
          self.emit("cqo");
          self.emit("idiv rbx");
          self.push("rax");
        }
      },
    }
    Ok(())
  }

  fn gen_term(&mut self, term: &Term) -> CompileResult<()> {
    match term {
      Term::IntLit(int_lit) => {
        self.emit(&format!("mov rax, {}", int_lit.value));
        self.push("rax");
      }
      Term::Ident(ident) => {
        let Some(stack_slot) = self
          .vars
          .iter()
          .find(|v| v.name == ident.value)
          .map(|v| v.stack_slot)
        else {
          return VariableNotDeclaredSnafu {
            name: ident.value.clone(),
            location: ident.location(),
          }
          .fail();
        };
        let offset = self.slot_offset(stack_slot);
        self.push(&format!("QWORD [rsp + {offset}]"));
      }
      Term::Paren(inner) => self.gen_expr(inner)?,
    }
    Ok(())
  }

  // ----- Emission helpers -----

  /// Byte offset of a slot from the current stack pointer.
  fn slot_offset(&self, stack_slot: usize) -> i64 {
    (self.stack_depth as i64 - stack_slot as i64 - 1) * 8
  }

  fn emit(&mut self, instruction: &str) {
    self.text.push_str("    ");
    self.text.push_str(instruction);
    self.text.push('\n');
  }

  fn label(&mut self, name: &str) {
    self.text.push_str(name);
    self.text.push_str(":\n");
  }

  fn push(&mut self, operand: &str) {
    self.emit(&format!("push {operand}"));
    self.stack_depth += 1;
  }

  fn pop(&mut self, operand: &str) {
    self.emit(&format!("pop {operand}"));
    self.stack_depth -= 1;
  }

  fn new_label(&mut self) -> String {
    let label = format!(".L{}", self.label_counter);
    self.label_counter += 1;
    label
  }
}

/// Fixed runtime appended after the generated code.
///
/// The printing helpers share one register contract: `rsi` points at the
/// bytes to append and `rcx` counts them. Output is staged in
/// `print_buffer` and written with a single `write` syscall on flush.
fn runtime_trailer() -> String {
  format!(
    "\
; ---- runtime ----

initialize_buffer:
    mov qword [buffer_used], 0
    ret

; Append rcx bytes at rsi, flushing first when they would overflow.
check_and_add_to_buffer:
    mov rax, [buffer_used]
    add rax, rcx
    cmp rax, {size}
    jle add_to_buffer
    push rsi
    push rcx
    call flush_buffer
    pop rcx
    pop rsi
    jmp add_to_buffer

; Copy rcx bytes from rsi into the staging buffer. No bounds check.
add_to_buffer:
    lea rdi, [print_buffer]
    add rdi, [buffer_used]
    add [buffer_used], rcx
    rep movsb
    ret

; Write the staged bytes to stdout and reset the buffer.
flush_buffer:
    call print_chars
    mov qword [buffer_used], 0
    ret

; Write the staged bytes to stdout, leaving the buffer untouched.
print_chars:
    mov rax, 1
    mov rdi, 1
    lea rsi, [print_buffer]
    mov rdx, [buffer_used]
    syscall
    ret

print_newline:
    lea rsi, [newline]
    mov rcx, 1
    call check_and_add_to_buffer
    ret

; Append the hexadecimal form of rsi.
print_int_h:
    mov rax, rsi
    sub rsp, 40
    lea r8, [rsp + 40]
.next_digit:
    dec r8
    mov rdx, rax
    and rdx, 15
    shr rax, 4
    cmp dl, 10
    jb .decimal
    add dl, 39
.decimal:
    add dl, '0'
    mov [r8], dl
    test rax, rax
    jnz .next_digit
    lea rcx, [rsp + 40]
    sub rcx, r8
    mov rsi, r8
    call check_and_add_to_buffer
    add rsp, 40
    ret

; Append the signed decimal form of rsi. The scratch area lives above rsp
; so it survives the helper call.
print_int:
    mov rax, rsi
    sub rsp, 40
    lea r8, [rsp + 40]
    xor r9, r9
    mov r10, 10
    cmp rax, 0
    jge .next_digit
    neg rax
    mov r9, 1
.next_digit:
    dec r8
    xor rdx, rdx
    div r10
    add dl, '0'
    mov [r8], dl
    test rax, rax
    jnz .next_digit
    test r9, r9
    jz .append
    dec r8
    mov byte [r8], '-'
.append:
    lea rcx, [rsp + 40]
    sub rcx, r8
    mov rsi, r8
    call check_and_add_to_buffer
    add rsp, 40
    ret
",
    size = PRINT_BUFFER_SIZE
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;
  use crate::{parser, tokenizer};

  fn compile(source: &str) -> CompileResult<String> {
    let tokens = tokenizer::tokenize(source).unwrap();
    let prog = parser::parse(tokens).unwrap();
    generate(&prog)
  }

  fn asm(source: &str) -> String {
    compile(source).unwrap()
  }

  #[test]
  fn sections_come_out_in_order() {
    let out = asm("exit(0);");
    let data = out.find("section .data").unwrap();
    let bss = out.find("section .bss").unwrap();
    let text = out.find("section .text").unwrap();
    let runtime = out.find("initialize_buffer:").unwrap();
    assert!(data < bss && bss < text && text < runtime);
    assert!(out.contains("newline db 10"));
    assert!(out.contains("_start:\n    call initialize_buffer"));
  }

  #[test]
  fn exit_lowers_to_the_exit_syscall() {
    let out = asm("exit(42);");
    assert!(out.contains("mov rax, 42\n    push rax"));
    assert!(out.contains("call flush_buffer\n    mov rax, 60\n    pop rdi\n    syscall"));
  }

  #[test]
  fn exit_terminated_program_has_no_default_tail() {
    let out = asm("exit(0);");
    assert!(!out.contains("mov rdi, 0"));
  }

  #[test]
  fn default_tail_added_when_last_statement_is_not_exit() {
    let out = asm("let x = 1;");
    assert!(out.contains(
      "call print_chars\n    mov rdi, 0\n    mov rax, 60\n    syscall"
    ));
  }

  #[test]
  fn variables_load_from_their_slots() {
    // x sits one expression push below the top when it is loaded second.
    let out = asm("let x = 10; let y = 32; exit(x + y);");
    assert!(out.contains("push QWORD [rsp + 0]"));
    assert!(out.contains("push QWORD [rsp + 16]"));
    assert!(out.contains("add rax, rbx"));
  }

  #[test]
  fn addition_evaluates_right_operand_first() {
    let out = asm("exit(1 + 2);");
    let two = out.find("mov rax, 2").unwrap();
    let one = out.find("mov rax, 1").unwrap();
    assert!(two < one);
  }

  #[test]
  fn multiplication_evaluates_left_operand_first() {
    let out = asm("exit(3 * 4);");
    let three = out.find("mov rax, 3").unwrap();
    let four = out.find("mov rax, 4").unwrap();
    assert!(three < four);
    assert!(out.contains("xor rdx, rdx\n    mul rbx"));
  }

  #[test]
  fn division_is_signed() {
    let out = asm("exit(8 / 2);");
    assert!(out.contains("cqo\n    idiv rbx"));
  }

  #[test]
  fn assignment_stores_back_into_the_slot() {
    let out = asm("let mut x = 1; x = x + 41; exit(x);");
    assert!(out.contains("mov QWORD [rsp + 0], rax"));
  }

  #[test]
  fn scope_exit_reclaims_declared_slots() {
    let out = asm("let x = 1; { let x = 99; } exit(x);");
    assert!(out.contains("add rsp, 8"));
    // The outer x is back on top once the scope is gone.
    assert!(out.contains("push QWORD [rsp + 0]"));
  }

  #[test]
  fn empty_scope_reclaims_nothing() {
    let out = asm("{ } exit(0);");
    let user_code = &out[out.find("_start:").unwrap()..out.find("; ---- runtime ----").unwrap()];
    assert!(!user_code.contains("add rsp,"));
  }

  #[test]
  fn if_chain_tests_and_branches() {
    let out = asm("if (0) { exit(1); } elif (1) { exit(2); } else { exit(3); } exit(4);");
    assert!(out.contains("test rax, rax"));
    assert!(out.contains("jz .L1"));
    assert!(out.contains("jmp .L0"));
    assert!(out.contains(".L0:"));
    assert!(out.contains(".L1:"));
    assert!(out.contains(".L2:"));
  }

  #[test]
  fn print_expression_keeps_the_value_on_the_stack() {
    let out = asm("print(7); exit(0);");
    assert!(out.contains(
      "mov rsi, QWORD [rsp]\n    call print_int\n    call print_newline"
    ));
    // No pop between printing and the next statement.
    let print_at = out.find("call print_newline").unwrap();
    let after = &out[print_at..out.find("call flush_buffer").unwrap()];
    assert!(!after.contains("pop"));
  }

  #[test]
  fn print_string_emits_data_and_length() {
    let out = asm("print(\"hello\\n\"); exit(0);");
    assert!(out.contains("string0 db 'hello', 10, '', 0"));
    assert!(out.contains("string0_len equ 7"));
    assert!(out.contains(
      "lea rsi, [string0]\n    mov rcx, string0_len\n    call check_and_add_to_buffer"
    ));
  }

  #[test]
  fn string_labels_are_unique() {
    let out = asm("print(\"a\"); print(\"b\"); exit(0);");
    assert!(out.contains("string0 db 'a', 0"));
    assert!(out.contains("string1 db 'b', 0"));
  }

  #[test]
  fn undeclared_variable_is_rejected() {
    let err = compile("exit(x);").unwrap_err();
    assert!(matches!(err, CompileError::VariableNotDeclared { .. }));
  }

  #[test]
  fn redeclaration_in_same_scope_is_rejected() {
    let err = compile("let x = 1; let x = 2;").unwrap_err();
    assert!(matches!(err, CompileError::VariableAlreadyDeclared { .. }));
  }

  #[test]
  fn shadowing_in_inner_scope_is_allowed() {
    assert!(compile("let x = 1; { let x = 2; } exit(x);").is_ok());
  }

  #[test]
  fn assignment_to_immutable_is_rejected() {
    let err = compile("let x = 1; x = 2;").unwrap_err();
    assert!(matches!(err, CompileError::VariableNotMutable { .. }));
  }

  #[test]
  fn assignment_to_undeclared_is_rejected() {
    let err = compile("x = 2;").unwrap_err();
    assert!(matches!(err, CompileError::VariableNotDeclared { .. }));
  }

  #[test]
  fn runtime_helpers_are_present_once() {
    let out = asm("exit(0);");
    for helper in [
      "\ninitialize_buffer:",
      "\ncheck_and_add_to_buffer:",
      "\nadd_to_buffer:",
      "\nflush_buffer:",
      "\nprint_newline:",
      "\nprint_chars:",
      "\nprint_int_h:",
      "\nprint_int:",
    ] {
      assert_eq!(out.matches(helper).count(), 1, "{helper}");
    }
  }
}
