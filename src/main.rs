fn main() {
    sleepsense_lib::run()
}
