//! End-to-end scenarios: source text through the front end and TAC
//! lowering, executed by the TAC interpreter.

use topaz::middle::{interpret, lower};
use topaz::{back, front};

fn run(src: &str) -> i32 {
    let mut unit = front::check("exec.c", src).expect("front end should accept the program");
    let tac = lower(&unit.program, &mut unit.tables).expect("lowering should succeed");
    let outcome = interpret(&tac, &unit.tables).expect("the program should run");
    // The same program must also make it through the whole back end.
    let asm = back::codegen(&tac, &unit.tables).expect("codegen should succeed");
    let machine = back::emit(&asm).expect("machine lowering should succeed");
    assert!(!machine.to_string().is_empty());
    outcome.exit
}

#[test]
fn arithmetic_and_recursion() {
    let src = "int add(int a, int b) { return a + b; }\n\
               int fib(int n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }\n\
               int main(void) { return add(5, 7) + fib(5); }";
    assert_eq!(run(src), 17);
}

#[test]
fn function_pointer_parameter() {
    let src = "int inc(int x) { return x + 1; }\n\
               int apply(int (*f)(int), int v) { return (*f)(v); }\n\
               int main(void) { int (*p)(int) = inc; return apply(p, 41); }";
    assert_eq!(run(src), 42);
}

#[test]
fn array_of_function_pointers() {
    let src = "int inc(int x) { return x + 1; }\n\
               int dec(int x) { return x - 1; }\n\
               int main(void) { int (*t[2])(int) = {inc, dec}; return t[1](t[0](41)); }";
    assert_eq!(run(src), 41);
}

#[test]
fn struct_with_embedded_pointer_field() {
    let src = "int global_data[4] = {1, 2, 3, 4};\n\
               \n\
               struct packet {\n\
                   int seed;\n\
                   int mid;\n\
                   int *data;\n\
               };\n\
               \n\
               void fill_packet(struct packet *p, int seed) {\n\
                   p->seed = seed;\n\
                   p->mid = 2;\n\
                   p->data = global_data;\n\
               }\n\
               \n\
               int sum_packet(struct packet *p, int pick) {\n\
                   int total = p->seed + p->mid;\n\
                   int i;\n\
                   for (i = 0; i < 4; i = i + 1)\n\
                       total = total + p->data[i];\n\
                   return total + p->data[pick];\n\
               }\n\
               \n\
               int main(void) {\n\
                   struct packet pk;\n\
                   fill_packet(&pk, 10);\n\
                   return sum_packet(&pk, 1);\n\
               }";
    // (10 + 2) + (1 + 2 + 3 + 4) + 2
    assert_eq!(run(src), 24);
}

#[test]
fn comma_operator_in_for_update() {
    let src = "int main(void) {\n\
                   int i;\n\
                   int sum;\n\
                   for (i = 0, sum = 0; i < 3; i = i + 1, sum = sum + i) {}\n\
                   return sum;\n\
               }";
    assert_eq!(run(src), 6);
}

#[test]
fn cleanup_handler_sequencing() {
    let src = "int acc = 0;\n\
               \n\
               void collect(int *p) { acc = acc + *p; }\n\
               \n\
               int main(void) {\n\
                   {\n\
                       _Cleanup(collect) int a = 5;\n\
                       _Cleanup(collect) int b = 9;\n\
                   }\n\
                   return acc;\n\
               }";
    assert_eq!(run(src), 14);
}

#[test]
fn enum_switch_with_arithmetic() {
    let src = "enum mode { MODE_WALK, MODE_JOG, MODE_RUN = 4 };\n\
               \n\
               static int kBias = 2;\n\
               \n\
               int score(int m) {\n\
                   switch (m) {\n\
                       case MODE_WALK: return 10;\n\
                       case MODE_JOG: return 20;\n\
                       case MODE_RUN: return 30;\n\
                       default: return 0;\n\
                   }\n\
               }\n\
               \n\
               int main(void) {\n\
                   int modes[3] = {MODE_RUN, MODE_WALK, MODE_JOG};\n\
                   int total = 0;\n\
                   int i;\n\
                   for (i = 0; i < 3; i = i + 1)\n\
                       total = total + score(modes[i]);\n\
                   return total + MODE_RUN + kBias;\n\
               }";
    // (30 + 10 + 20) + 4 + 2
    assert_eq!(run(src), 66);
}
