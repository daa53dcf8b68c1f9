fn main() {
    oxsh::shell_main()
}
